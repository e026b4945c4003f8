//! Stratus OCI Provider
//!
//! Provider for the database control plane, where every mutation returns a
//! work request that is polled until it reaches a terminal status.
//!
//! ## Module Structure
//!
//! - `config` - Endpoint, credentials and retry settings
//! - `client` - REST transport and pagination
//! - `resources` - Resource type definitions and request builders
//! - `provider` - OciProvider implementation
//! - `sweeper` - Cleanup of leftover test resources

pub mod client;
pub mod config;
pub mod provider;
pub mod resources;
pub mod sweeper;

// Re-export main types
pub use client::{HttpClient, ServiceClient};
pub use config::{ConfigError, ProviderConfig};
pub use provider::OciProvider;
pub use resources::{ResourceDeclaration, ResourceSpec};
pub use sweeper::{SweepReport, Sweeper, SweeperConfig};

use stratus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl<C: ServiceClient + 'static> Provider for OciProvider<C> {
    fn name(&self) -> &'static str {
        "oci"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(&resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let to = to.clone();
        Box::pin(async move { self.update_resource(&id, &identifier, &to).await })
    }

    fn delete(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        Box::pin(async move { self.delete_resource(&id, &identifier, &from).await })
    }
}
