//! Stratus Core
//!
//! Core library for reconciling declared resources against a cloud control
//! plane whose mutations complete asynchronously through work requests.
//!
//! ## Module Structure
//!
//! - `work_request` - Work request data model (status, affected resources, errors)
//! - `transport` - Client seam used to fetch work request status and errors
//! - `retry` - Retry policy with an absolute elapsed-time ceiling
//! - `poller` - Generic work request poller
//! - `resolver` - Outcome resolution for terminated work requests
//! - `provider`, `resource`, `differ`, `plan`, `effect` - Reconciliation model

pub mod differ;
pub mod effect;
pub mod error;
pub mod plan;
pub mod poller;
pub mod provider;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod transport;
pub mod work_request;

pub use error::{WorkRequestError, WorkRequestResult};
pub use poller::{WaitOutcome, WorkRequestPoller, wait_while};
pub use retry::{Backoff, RetryPolicy};
pub use transport::{TransportError, TransportResult, WorkRequestClient};
pub use work_request::{
    ActionType, AffectedResource, OperationError, OperationStatus, WorkRequest, WorkRequestId,
};
