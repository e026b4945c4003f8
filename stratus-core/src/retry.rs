//! Retry Policy - Decides whether a call should be attempted again
//!
//! The policy is a pure function of the last response and the time elapsed
//! since the retry sequence began. The caller captures the start instant and
//! passes the elapsed duration on every decision, so a single policy value
//! can be shared by any number of independent call chains.

use std::time::Duration;

use crate::transport::{TransportError, TransportResult};

/// Interval growth between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: if multiplier.is_finite() {
                multiplier.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// Constant interval between attempts
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 1.0)
    }

    /// Delay to wait after the given zero-based attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}

/// Retry policy with an absolute elapsed-time ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// No retry is ever granted once this much time has elapsed
    pub max_elapsed: Duration,
    pub backoff: Backoff,
    /// Retry 404 responses while `elapsed < not_found_window`.
    /// Newly created entities can take a moment to become readable.
    pub retry_not_found: bool,
    pub not_found_window: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ELAPSED: Duration = Duration::from_secs(20 * 60);
    pub const DEFAULT_NOT_FOUND_WINDOW: Duration = Duration::from_secs(2 * 60);

    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            max_elapsed,
            backoff: Backoff::default(),
            retry_not_found: true,
            not_found_window: Self::DEFAULT_NOT_FOUND_WINDOW,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_not_found_retries(mut self, enabled: bool) -> Self {
        self.retry_not_found = enabled;
        self
    }

    pub fn with_not_found_window(mut self, window: Duration) -> Self {
        self.not_found_window = window;
        self
    }

    /// Returns true once the elapsed-time ceiling has been reached
    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        elapsed >= self.max_elapsed
    }

    /// Decide whether to attempt the call again.
    ///
    /// `still_pending` is the operation-specific predicate applied to a
    /// successful response; errors fall back to [`Self::default_should_retry`].
    pub fn should_retry<T>(
        &self,
        response: &TransportResult<T>,
        elapsed: Duration,
        still_pending: impl Fn(&T) -> bool,
    ) -> bool {
        if self.is_exhausted(elapsed) {
            return false;
        }

        match response {
            Ok(value) => still_pending(value),
            Err(err) => self.default_should_retry(err, elapsed),
        }
    }

    /// Base rule for failed calls: retry transient failures, never client errors
    pub fn default_should_retry(&self, err: &TransportError, elapsed: Duration) -> bool {
        !self.is_exhausted(elapsed) && self.is_transient(err, elapsed)
    }

    /// Whether `err` is worth retrying, ignoring the elapsed-time ceiling
    pub fn is_transient(&self, err: &TransportError, elapsed: Duration) -> bool {
        match err.status {
            None => !err.is_decode(),
            Some(429) => true,
            Some(status) if status >= 500 => true,
            Some(409) => err.code.as_deref() == Some("IncorrectState"),
            Some(404) => self.retry_not_found && elapsed < self.not_found_window,
            Some(_) => false,
        }
    }

    /// Interval to wait after the given zero-based attempt
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ELAPSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(pending: bool) -> TransportResult<bool> {
        Ok(pending)
    }

    #[test]
    fn never_retries_past_max_elapsed() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        let responses = [
            ok(true),
            Err(TransportError::http(503, None, "unavailable")),
            Err(TransportError::http(429, None, "throttled")),
            Err(TransportError::network("reset")),
        ];

        for elapsed in [10, 11, 3600] {
            for response in &responses {
                assert!(!policy.should_retry(response, Duration::from_secs(elapsed), |p| *p));
            }
        }
    }

    #[test]
    fn pending_response_is_retried_before_deadline() {
        let policy = RetryPolicy::new(Duration::from_secs(10));
        assert!(policy.should_retry(&ok(true), Duration::from_secs(9), |p| *p));
        assert!(!policy.should_retry(&ok(false), Duration::from_secs(1), |p| *p));
    }

    #[test]
    fn default_rule_retries_transient_errors_only() {
        let policy = RetryPolicy::new(Duration::from_secs(600)).with_not_found_retries(false);
        let elapsed = Duration::from_secs(1);

        assert!(policy.default_should_retry(&TransportError::network("timeout"), elapsed));
        assert!(policy.default_should_retry(&TransportError::http(429, None, ""), elapsed));
        assert!(policy.default_should_retry(&TransportError::http(500, None, ""), elapsed));
        assert!(policy.default_should_retry(&TransportError::http(503, None, ""), elapsed));
        assert!(policy.default_should_retry(
            &TransportError::http(409, Some("IncorrectState".to_string()), ""),
            elapsed
        ));

        assert!(!policy.default_should_retry(&TransportError::http(400, None, ""), elapsed));
        assert!(!policy.default_should_retry(&TransportError::http(401, None, ""), elapsed));
        assert!(!policy.default_should_retry(&TransportError::http(404, None, ""), elapsed));
        assert!(!policy.default_should_retry(
            &TransportError::http(409, Some("Conflict".to_string()), ""),
            elapsed
        ));
        assert!(!policy.default_should_retry(&TransportError::decode("bad json"), elapsed));
    }

    #[test]
    fn not_found_retried_only_inside_window() {
        let policy = RetryPolicy::new(Duration::from_secs(600))
            .with_not_found_window(Duration::from_secs(30));
        let not_found = TransportError::http(404, None, "not found");

        assert!(policy.default_should_retry(&not_found, Duration::from_secs(5)));
        assert!(!policy.default_should_retry(&not_found, Duration::from_secs(30)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let backoff = Backoff::fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(7), Duration::from_millis(250));
    }
}
