//! Work-Request Poller - Wait for asynchronous operations to finish
//!
//! A single generic poller replaces the per-resource wait loops: callers
//! supply the work request handle, the entity type and action they expect,
//! and a timeout. The poller suspends the calling task between attempts and
//! returns the identifier of the affected entity once the work request
//! reaches a terminal state.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{WorkRequestError, WorkRequestResult};
use crate::resolver::resolve_work_request;
use crate::retry::RetryPolicy;
use crate::transport::{TransportError, TransportResult, WorkRequestClient};
use crate::work_request::{ActionType, OperationStatus, WorkRequest, WorkRequestId};

/// Polls work requests through a transport client
#[derive(Debug, Clone)]
pub struct WorkRequestPoller<C> {
    client: C,
    policy: RetryPolicy,
}

impl<C: WorkRequestClient> WorkRequestPoller<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    /// Base policy; `max_elapsed` is replaced by the timeout of each wait
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Wait for `handle` to terminate and return the identifier of the entity
    /// of `entity_type` that received `action`.
    pub async fn wait_for_terminal(
        &self,
        handle: &WorkRequestId,
        entity_type: &str,
        action: ActionType,
        timeout: Duration,
    ) -> WorkRequestResult<String> {
        let started = Instant::now();
        let policy = self.policy.clone().with_max_elapsed(timeout);
        let work_request = poll_until_terminal(&self.client, handle, &policy).await?;

        // Resolution shares the wait's budget
        let remaining = policy
            .clone()
            .with_max_elapsed(timeout.saturating_sub(started.elapsed()));
        resolve_work_request(&self.client, &work_request, entity_type, action, &remaining).await
    }
}

/// Poll `handle` until it reaches a terminal status or `policy` gives up
pub async fn poll_until_terminal<C>(
    client: &C,
    handle: &WorkRequestId,
    policy: &RetryPolicy,
) -> WorkRequestResult<WorkRequest>
where
    C: WorkRequestClient + ?Sized,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    let mut last_status: Option<OperationStatus> = None;

    loop {
        let response = client.get_work_request(handle).await;
        let elapsed = start.elapsed();

        match &response {
            Ok(work_request) => {
                debug!(
                    "Work request {} attempt {}: {}",
                    handle,
                    attempt + 1,
                    work_request.status
                );
                last_status = Some(observe(handle, last_status, work_request.status));
            }
            Err(err) => {
                warn!(
                    "Polling work request {} failed on attempt {}: {}",
                    handle,
                    attempt + 1,
                    err
                );
            }
        }

        if matches!(&response, Ok(work_request) if !work_request.is_pending()) {
            return response.map_err(WorkRequestError::from);
        }

        if !policy.should_retry(&response, elapsed, WorkRequest::is_pending) {
            return Err(stop_reason(handle, response, policy, elapsed, last_status));
        }

        let remaining = policy.max_elapsed.saturating_sub(elapsed);
        tokio::time::sleep(policy.next_delay(attempt).min(remaining)).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Track the most advanced status seen so far, warning on regressions
fn observe(
    handle: &WorkRequestId,
    previous: Option<OperationStatus>,
    current: OperationStatus,
) -> OperationStatus {
    match previous {
        Some(prev) if current.rank() < prev.rank() => {
            warn!(
                "Work request {} went from {} back to {}, ignoring",
                handle, prev, current
            );
            prev
        }
        _ => current,
    }
}

fn stop_reason(
    handle: &WorkRequestId,
    response: TransportResult<WorkRequest>,
    policy: &RetryPolicy,
    elapsed: Duration,
    last_status: Option<OperationStatus>,
) -> WorkRequestError {
    let timed_out = WorkRequestError::Timeout {
        work_request_id: handle.clone(),
        elapsed,
        last_status,
    };

    match response {
        Ok(_) => timed_out,
        Err(err) if policy.is_exhausted(elapsed) && policy.is_transient(&err, elapsed) => {
            timed_out
        }
        Err(err) => WorkRequestError::Transport(err),
    }
}

/// Result of [`wait_while`]
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// The condition cleared; holds the last fetched value
    Done(T),
    /// The policy ran out of time; holds the last fetched value, if any
    TimedOut(Option<T>),
    /// The fetch failed with an error the policy would not retry
    Failed(TransportError),
}

/// Repeatedly `fetch` a value while `still_waiting` holds for it.
///
/// Fetch errors are retried per the policy's default rule. Used for waits
/// that are not driven by a work request, such as waiting for a terminated
/// entity to reach its deleted lifecycle state.
pub async fn wait_while<T, F, Fut, P>(
    policy: &RetryPolicy,
    mut fetch: F,
    still_waiting: P,
) -> WaitOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TransportResult<T>>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    let mut last: Option<T> = None;

    loop {
        let response = fetch().await;
        let elapsed = start.elapsed();

        if policy.should_retry(&response, elapsed, &still_waiting) {
            if let Ok(value) = response {
                last = Some(value);
            }
            let remaining = policy.max_elapsed.saturating_sub(elapsed);
            tokio::time::sleep(policy.next_delay(attempt).min(remaining)).await;
            attempt = attempt.saturating_add(1);
            continue;
        }

        return match response {
            Ok(value) if !still_waiting(&value) => WaitOutcome::Done(value),
            Ok(value) => WaitOutcome::TimedOut(Some(value)),
            Err(err) if policy.is_exhausted(elapsed) && policy.is_transient(&err, elapsed) => {
                WaitOutcome::TimedOut(last)
            }
            Err(err) => WaitOutcome::Failed(err),
        };
    }
}
