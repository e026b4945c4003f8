//! Stratus State Management
//!
//! Persists the identifiers and last-applied attributes of managed
//! resources, with a lock that keeps concurrent runs from interleaving.
//!
//! - **StateFile**: All managed resources, in creation order
//! - **StateBackend**: Trait for state storage backends
//! - **LockInfo**: Information about the lock held by a run
//!
//! # Example
//!
//! ```ignore
//! use stratus_state::{create_backend, BackendConfig, LockOperation};
//!
//! let backend = create_backend(&BackendConfig::local("stratus.state.json"))?;
//! let lock = backend.acquire_lock(LockOperation::Apply).await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//! // ... apply effects, upserting each resource as it succeeds ...
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::{LockInfo, LockOperation};
pub use state::{ResourceState, StateFile};
