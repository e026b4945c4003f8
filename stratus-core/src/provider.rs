//! Provider - Trait abstracting resource operations
//!
//! A Provider defines operations for a specific cloud control plane.
//! It is responsible for converting Effects into actual API calls and for
//! waiting on the work requests those calls start.

use std::future::Future;
use std::pin::Pin;

use crate::error::WorkRequestError;
use crate::resource::{Resource, ResourceId, State};
use crate::transport::TransportError;

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, id: ResourceId) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The work request error behind this failure, if any
    pub fn work_request_error(&self) -> Option<&WorkRequestError> {
        self.cause
            .as_ref()
            .and_then(|e| e.downcast_ref::<WorkRequestError>())
    }
}

impl From<WorkRequestError> for ProviderError {
    fn from(err: WorkRequestError) -> Self {
        Self::new(err.to_string()).with_cause(err)
    }
}

impl From<TransportError> for ProviderError {
    fn from(err: TransportError) -> Self {
        Self::new(err.to_string()).with_cause(err)
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "autonomous_container_database")
    fn name(&self) -> &'static str;

    /// Entity type reported in work request resources (e.g., "autonomouscontainerdatabase")
    fn entity_type(&self) -> &'static str;

    /// Whether changed attributes can be applied in place
    fn supports_update(&self) -> bool {
        false
    }

    /// Attributes that are sent to the service but never stored in state
    fn sensitive_attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Attributes fixed at creation; changing one replaces the resource
    fn create_only_attributes(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Main Provider trait
///
/// Each control plane provider implements this trait.
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "oci")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist or no
    /// identifier is known yet.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the identifier resolved from the
    /// create work request
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource and wait for the delete work request.
    ///
    /// `from` is the stored state of the resource.
    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> BoxFuture<'_, ProviderResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_request::{ActionType, OperationStatus, WorkRequestId};

    // Mock Provider for testing
    struct MockProvider;

    impl Provider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
            vec![]
        }

        fn read(
            &self,
            id: &ResourceId,
            _identifier: Option<&str>,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            Box::pin(async move { Ok(State::not_found(id)) })
        }

        fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
            let id = resource.id.clone();
            let attrs = resource.attributes.clone();
            Box::pin(async move { Ok(State::existing(id, attrs).with_identifier("mock-id-123")) })
        }

        fn update(
            &self,
            id: &ResourceId,
            _identifier: &str,
            _from: &State,
            to: &Resource,
        ) -> BoxFuture<'_, ProviderResult<State>> {
            let id = id.clone();
            let attrs = to.attributes.clone();
            Box::pin(async move { Ok(State::existing(id, attrs)) })
        }

        fn delete(
            &self,
            _id: &ResourceId,
            _identifier: &str,
            _from: &State,
        ) -> BoxFuture<'_, ProviderResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn mock_provider_read_returns_not_found() {
        let provider = MockProvider;
        let id = ResourceId::new("test", "example");
        let state = provider.read(&id, None).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn mock_provider_create_returns_existing() {
        let provider: Box<dyn Provider> = Box::new(MockProvider);
        let resource = Resource::new("test", "example");
        let state = provider.create(&resource).await.unwrap();
        assert!(state.exists);
        assert_eq!(state.identifier, Some("mock-id-123".to_string()));
    }

    #[test]
    fn work_request_error_is_kept_as_cause() {
        let err = ProviderError::from(WorkRequestError::DidNotSucceed {
            work_request_id: WorkRequestId::new("wr-1"),
            entity_type: "bds".to_string(),
            action: ActionType::Updated,
            status: OperationStatus::Failed,
            message: "disk full".to_string(),
        })
        .for_resource(ResourceId::new("bds_instance_patch_action", "patch"));

        assert!(err.to_string().starts_with("[bds_instance_patch_action.patch] "));
        assert!(err.to_string().contains("disk full"));
        assert!(matches!(
            err.work_request_error(),
            Some(WorkRequestError::DidNotSucceed { .. })
        ));
    }
}
