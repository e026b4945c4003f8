//! Transport - Seam between the polling core and the REST client
//!
//! The core never talks HTTP itself. Anything that can fetch a work request
//! snapshot and list its errors can drive the poller.

use std::sync::Arc;

use thiserror::Error;

use crate::provider::BoxFuture;
use crate::work_request::{OperationError, WorkRequest, WorkRequestId};

/// Structured error returned by the transport client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", self.describe())]
pub struct TransportError {
    /// HTTP status code, if a response was received at all
    pub status: Option<u16>,
    /// Service error code (e.g., "NotAuthorizedOrNotFound")
    pub code: Option<String>,
    pub message: String,
}

impl TransportError {
    /// A failure with no HTTP response (connect error, timeout, reset)
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// A non-2xx response from the service
    pub fn http(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
        }
    }

    /// A response body that could not be decoded
    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some("DecodeError".to_string()),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_decode(&self) -> bool {
        self.status.is_none() && self.code.as_deref() == Some("DecodeError")
    }

    fn describe(&self) -> String {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => format!("{} ({}): {}", status, code, self.message),
            (Some(status), None) => format!("{}: {}", status, self.message),
            (None, _) => self.message.clone(),
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Operations the poller and resolver need from the transport client
pub trait WorkRequestClient: Send + Sync {
    /// Fetch the current snapshot of a work request
    fn get_work_request<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<WorkRequest>>;

    /// List every error recorded against a work request, in service order
    fn list_work_request_errors<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<Vec<OperationError>>>;
}

impl<T: WorkRequestClient + ?Sized> WorkRequestClient for Arc<T> {
    fn get_work_request<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<WorkRequest>> {
        (**self).get_work_request(id)
    }

    fn list_work_request_errors<'a>(
        &'a self,
        id: &'a WorkRequestId,
    ) -> BoxFuture<'a, TransportResult<Vec<OperationError>>> {
        (**self).list_work_request_errors(id)
    }
}
