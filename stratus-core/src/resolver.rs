//! Outcome Resolver - Classify a terminated work request
//!
//! A terminated work request lists every entity it touched. The resolver picks
//! the one matching the expected `(entity_type, action)` pair and returns its
//! identifier, or turns the remote error list into a single failure.

use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{WorkRequestError, WorkRequestResult};
use crate::retry::RetryPolicy;
use crate::transport::{TransportResult, WorkRequestClient};
use crate::work_request::{
    ActionType, AffectedResource, OperationError, OperationStatus, WorkRequest, WorkRequestId,
};

/// Find the identifier of the entity matching `entity_type` and `action`.
///
/// Entity types match when the reported type contains the expected one,
/// ignoring case ("autonomousContainerDatabase" matches
/// "autonomouscontainerdatabase"). Actions must match exactly.
pub fn find_identifier<'a>(
    resources: &'a [AffectedResource],
    entity_type: &str,
    action: ActionType,
) -> Option<&'a str> {
    let expected = entity_type.to_lowercase();
    resources
        .iter()
        .find(|res| {
            res.action_type == action && res.entity_type.to_lowercase().contains(&expected)
        })
        .map(|res| res.identifier.as_str())
}

/// Returns true if the outcome needs the remote error list to be reported
pub fn needs_errors(
    status: OperationStatus,
    resources: &[AffectedResource],
    entity_type: &str,
    action: ActionType,
) -> bool {
    status != OperationStatus::Succeeded
        || find_identifier(resources, entity_type, action).is_none()
}

/// Resolve a terminated work request into the identifier of the affected entity.
///
/// Succeeds only when the status is `Succeeded` and a matching entity exists.
/// Every other outcome, including a success that touched no matching entity,
/// becomes [`WorkRequestError::DidNotSucceed`] carrying all `errors` joined by
/// newlines in the order given.
pub fn resolve(
    work_request_id: &WorkRequestId,
    status: OperationStatus,
    resources: &[AffectedResource],
    entity_type: &str,
    action: ActionType,
    errors: &[OperationError],
) -> WorkRequestResult<String> {
    if status == OperationStatus::Succeeded
        && let Some(identifier) = find_identifier(resources, entity_type, action)
    {
        return Ok(identifier.to_string());
    }

    let message = errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Err(WorkRequestError::DidNotSucceed {
        work_request_id: work_request_id.clone(),
        entity_type: entity_type.to_string(),
        action,
        status,
        message,
    })
}

/// Resolve a terminated work request, fetching its error list only when the
/// outcome is a failure.
///
/// Listing errors is retried under `policy` like any other transport call.
pub async fn resolve_work_request<C>(
    client: &C,
    work_request: &WorkRequest,
    entity_type: &str,
    action: ActionType,
    policy: &RetryPolicy,
) -> WorkRequestResult<String>
where
    C: WorkRequestClient + ?Sized,
{
    let failed = needs_errors(
        work_request.status,
        &work_request.resources,
        entity_type,
        action,
    );
    let errors = if failed {
        debug!(
            "Work request {} ended {}, listing errors",
            work_request.id, work_request.status
        );
        list_errors_with_retry(client, &work_request.id, policy).await?
    } else {
        Vec::new()
    };

    let result = resolve(
        &work_request.id,
        work_request.status,
        &work_request.resources,
        entity_type,
        action,
        &errors,
    );

    if let Ok(identifier) = &result {
        info!(
            "Work request {} {} {} {}",
            work_request.id, action, entity_type, identifier
        );
    }

    result
}

async fn list_errors_with_retry<C>(
    client: &C,
    id: &WorkRequestId,
    policy: &RetryPolicy,
) -> TransportResult<Vec<OperationError>>
where
    C: WorkRequestClient + ?Sized,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0;

    loop {
        let result = client.list_work_request_errors(id).await;
        let elapsed: Duration = start.elapsed();

        match result {
            Ok(errors) => return Ok(errors),
            Err(err) if policy.default_should_retry(&err, elapsed) => {
                warn!(
                    "Listing errors for work request {} failed: {}, retrying",
                    id, err
                );
                let remaining = policy.max_elapsed.saturating_sub(elapsed);
                tokio::time::sleep(policy.next_delay(attempt).min(remaining)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
