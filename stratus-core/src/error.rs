//! Errors surfaced by the work request poller and resolver

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;
use crate::work_request::{ActionType, OperationStatus, WorkRequestId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkRequestError {
    /// The transport returned an error the retry policy would not retry
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The retry budget ran out while the work request was still pending
    #[error(
        "work request {work_request_id} did not complete in time (waited {elapsed:?}, last status: {})",
        status_label(.last_status)
    )]
    Timeout {
        work_request_id: WorkRequestId,
        elapsed: Duration,
        last_status: Option<OperationStatus>,
    },

    /// The work request failed, was canceled, or succeeded without touching
    /// the expected entity
    #[error(
        "work request did not succeed, workId: {work_request_id}, entity: {entity_type}, action: {action}. Message: {message}"
    )]
    DidNotSucceed {
        work_request_id: WorkRequestId,
        entity_type: String,
        action: ActionType,
        status: OperationStatus,
        message: String,
    },

    /// An action response carried no work request handle
    #[error("no work request id returned by {operation}")]
    MissingHandle { operation: String },
}

impl WorkRequestError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

fn status_label(status: &Option<OperationStatus>) -> &'static str {
    status.map(|s| s.as_str()).unwrap_or("unknown")
}

pub type WorkRequestResult<T> = Result<T, WorkRequestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_not_succeed_message_names_everything() {
        let err = WorkRequestError::DidNotSucceed {
            work_request_id: WorkRequestId::new("wr-1"),
            entity_type: "bds".to_string(),
            action: ActionType::Updated,
            status: OperationStatus::Failed,
            message: "disk full\nquota exceeded".to_string(),
        };

        assert_eq!(
            err.to_string(),
            "work request did not succeed, workId: wr-1, entity: bds, action: UPDATED. Message: disk full\nquota exceeded"
        );
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let err = WorkRequestError::Timeout {
            work_request_id: WorkRequestId::new("wr-2"),
            elapsed: Duration::from_secs(2),
            last_status: Some(OperationStatus::InProgress),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("did not complete in time"));
        assert!(err.to_string().contains("IN_PROGRESS"));
    }
}
