//! OCI Provider implementation
//!
//! Starts each mutation with a REST call, takes the work request id from the
//! response and waits for it through the shared work request poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::{
    ActionType, RetryPolicy, TransportResult, WorkRequestError, WorkRequestId, WorkRequestPoller,
};
use tokio::time::Instant;

use crate::client::{ApiRequest, ApiResponse, HttpClient, ServiceClient};
use crate::config::{ConfigError, ProviderConfig};
use crate::resources::{
    Operation, ResourceSpec, TIMEOUTS_ATTRIBUTE, default_timeouts, delete_operation, entity_path,
    find_resource_type, is_deleted_lifecycle, timeouts_in, timeouts_of,
};

/// Fields every readable entity reports
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EntitySummary {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub lifecycle_state: Option<String>,
}

/// OCI Provider
pub struct OciProvider<C = HttpClient> {
    client: Arc<C>,
    poller: WorkRequestPoller<Arc<C>>,
}

impl OciProvider<HttpClient> {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let client = HttpClient::new(config)?;
        Ok(Self::new(client).with_policy(config.retry.to_policy()?))
    }
}

impl<C: ServiceClient> OciProvider<C> {
    pub fn new(client: C) -> Self {
        let client = Arc::new(client);
        Self {
            poller: WorkRequestPoller::new(Arc::clone(&client)),
            client,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.poller = self.poller.with_policy(policy);
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn poller(&self) -> &WorkRequestPoller<Arc<C>> {
        &self.poller
    }

    // =========================================================================
    // REST Helpers
    // =========================================================================

    /// Send a request, retrying transient failures under the base policy.
    ///
    /// 404s are only retried for calls that may race a fresh entity
    /// (`retry_not_found`); reads and deletes treat them as final.
    pub(crate) async fn send_with_retry(
        &self,
        request: ApiRequest,
        retry_not_found: bool,
    ) -> TransportResult<ApiResponse> {
        let policy = self
            .poller
            .policy()
            .clone()
            .with_not_found_retries(self.poller.policy().retry_not_found && retry_not_found);
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            match self.client.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let elapsed = start.elapsed();
                    if !policy.default_should_retry(&err, elapsed) {
                        return Err(err);
                    }
                    warn!(
                        "{} {} failed, retrying: {}",
                        request.method, request.path, err
                    );
                    let remaining = policy.max_elapsed.saturating_sub(elapsed);
                    tokio::time::sleep(policy.next_delay(attempt).min(remaining)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Start an operation and wait for its work request to finish
    async fn run_operation(
        &self,
        operation: Operation,
        label: &str,
        timeout: Duration,
    ) -> Result<String, WorkRequestError> {
        let retry_not_found = operation.action != ActionType::Deleted;
        let response = self
            .send_with_retry(operation.request, retry_not_found)
            .await?;
        let handle = response
            .work_request_id
            .ok_or_else(|| WorkRequestError::MissingHandle {
                operation: label.to_string(),
            })?;

        info!("{} started work request {}", label, handle);
        let identifier = self
            .poller
            .wait_for_terminal(&handle, operation.entity_type, operation.action, timeout)
            .await?;
        info!("Work request {} finished for {}", handle, identifier);
        Ok(identifier)
    }

    /// GET an entity. `None` when it is gone or in a deleted lifecycle state.
    pub(crate) async fn get_entity(
        &self,
        kind: &str,
        identifier: &str,
    ) -> TransportResult<Option<serde_json::Value>> {
        let Some(path) = entity_path(kind, identifier) else {
            return Ok(None);
        };

        match self.send_with_retry(ApiRequest::get(path), false).await {
            Ok(response) => {
                let summary: EntitySummary = response.json()?;
                if summary
                    .lifecycle_state
                    .as_deref()
                    .is_some_and(is_deleted_lifecycle)
                {
                    debug!("{} {} is {:?}", kind, summary.id, summary.lifecycle_state);
                    return Ok(None);
                }
                Ok(Some(response.body))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let resource_type = find_resource_type(&id.resource_type).ok_or_else(|| {
            ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })?;

        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };

        // Actions leave nothing behind to read
        if entity_path(resource_type.name(), identifier).is_none() {
            return Ok(State::existing(id.clone(), HashMap::new()).with_identifier(identifier));
        }

        let body = self
            .get_entity(resource_type.name(), identifier)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        match body {
            Some(body) => Ok(State::existing(id.clone(), read_attributes(&body))
                .with_identifier(identifier)),
            None => Ok(State::not_found(id.clone())),
        }
    }

    pub async fn create_resource(&self, resource: &Resource) -> ProviderResult<State> {
        let spec = ResourceSpec::from_resource(resource)?;
        let timeout = timeouts_of(resource).resolve(spec.default_timeouts()).create;

        let identifier = self
            .run_operation(spec.create(), &format!("create {}", resource.id), timeout)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(resource.id.clone()))?;

        Ok(State::existing(resource.id.clone(), stored_attributes(&spec, resource))
            .with_identifier(identifier))
    }

    pub async fn update_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State> {
        let spec = ResourceSpec::from_resource(to)?;
        let operation = spec.update(identifier).ok_or_else(|| {
            ProviderError::new(format!(
                "Update not supported for {}, delete and recreate",
                id.resource_type
            ))
            .for_resource(id.clone())
        })?;
        let timeout = timeouts_of(to).resolve(spec.default_timeouts()).update;

        let updated = self
            .run_operation(operation, &format!("update {}", id), timeout)
            .await
            .map_err(|e| ProviderError::from(e).for_resource(id.clone()))?;

        if updated != identifier {
            warn!(
                "Update of {} reported identifier {} (expected {})",
                id, updated, identifier
            );
        }

        Ok(State::existing(id.clone(), stored_attributes(&spec, to)).with_identifier(identifier))
    }

    /// Delete the entity behind `identifier`, waiting up to the delete
    /// timeout recorded in its stored state `from`
    pub async fn delete_resource(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
    ) -> ProviderResult<()> {
        let resource_type = find_resource_type(&id.resource_type).ok_or_else(|| {
            ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })?;

        let Some(operation) = delete_operation(resource_type.name(), identifier) else {
            debug!("{} is an action; nothing to delete", id);
            return Ok(());
        };
        let timeout = timeouts_in(&from.attributes)
            .resolve(default_timeouts(resource_type.name()))
            .delete;

        match self
            .run_operation(operation, &format!("delete {}", id), timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(WorkRequestError::Transport(err)) if err.is_not_found() => {
                debug!("{} already deleted", id);
                Ok(())
            }
            Err(err) => Err(ProviderError::from(err).for_resource(id.clone())),
        }
    }

    /// Wait for an arbitrary work request and return the affected identifier
    pub async fn wait_for(
        &self,
        handle: &WorkRequestId,
        entity_type: &str,
        action: ActionType,
        timeout: Duration,
    ) -> Result<String, WorkRequestError> {
        self.poller
            .wait_for_terminal(handle, entity_type, action, timeout)
            .await
    }
}

/// Attributes persisted after a create or update, keeping the timeout
/// overrides so later deletes honor them
fn stored_attributes(spec: &ResourceSpec, resource: &Resource) -> HashMap<String, Value> {
    let mut attributes = spec.attributes();
    if let Some(timeouts) = resource.attributes.get(TIMEOUTS_ATTRIBUTE) {
        attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), timeouts.clone());
    }
    attributes
}

/// Map a camelCase entity body to snake_case attributes
fn read_attributes(body: &serde_json::Value) -> HashMap<String, Value> {
    let Some(map) = body.as_object() else {
        return HashMap::new();
    };

    map.iter()
        .filter_map(|(key, value)| {
            Value::from_json(value).map(|v| (to_snake_case(key), v))
        })
        .collect()
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{
        AUTONOMOUS_CONTAINER_DATABASE, BDS_INSTANCE_PATCH_ACTION, DATABASE_TOOLS_CONNECTION,
        ResourceDeclaration,
    };
    use serde_json::json;
    use stratus_core::Backoff;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OciProvider {
        let config = ProviderConfig::default().with_endpoint(server.uri());
        OciProvider::from_config(&config)
            .unwrap()
            .with_policy(
                RetryPolicy::default()
                    .with_backoff(Backoff::fixed(Duration::from_millis(10)))
                    .with_not_found_retries(false),
            )
    }

    fn work_request(id: &str, status: &str, resources: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "status": status,
            "resources": resources,
        }))
    }

    fn patch_resource() -> Resource {
        let decl: ResourceDeclaration = serde_json::from_value(json!({
            "name": "patch",
            "kind": BDS_INSTANCE_PATCH_ACTION,
            "bds_instance_id": "ocid1.bdsinstance.oc1..aaa",
            "cluster_admin_password": "hunter2",
            "version": "3.0.2"
        }))
        .unwrap();
        decl.to_resource()
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("displayName"), "display_name");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(
            to_snake_case("cloudAutonomousVmClusterId"),
            "cloud_autonomous_vm_cluster_id"
        );
    }

    #[tokio::test]
    async fn test_patch_action_resolves_bds_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/20190531/bdsInstances/ocid1.bdsinstance.oc1..aaa/actions/installPatch",
            ))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-1"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-1"))
            .respond_with(work_request(
                "wr-1",
                "IN_PROGRESS",
                json!([{"entityType": "bds", "actionType": "IN_PROGRESS", "identifier": "ocid1.bdsinstance.oc1..aaa"}]),
            ))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-1"))
            .respond_with(work_request(
                "wr-1",
                "SUCCEEDED",
                json!([{"entityType": "bds", "actionType": "UPDATED", "identifier": "ocid1.bdsinstance.oc1..aaa"}]),
            ))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let state = provider.create_resource(&patch_resource()).await.unwrap();

        assert!(state.exists);
        assert_eq!(state.identifier.as_deref(), Some("ocid1.bdsinstance.oc1..aaa"));
        assert_eq!(
            state.attributes.get("version"),
            Some(&Value::String("3.0.2".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_work_request_surfaces_all_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-2"))
            .respond_with(work_request("wr-2", "FAILED", json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-2/errors"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"code": "PatchFailed", "message": "node unreachable"},
                {"code": "PatchFailed", "message": "rollback complete"}
            ])))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let resource = patch_resource();
        let err = provider.create_resource(&resource).await.unwrap_err();

        assert_eq!(err.resource_id, Some(resource.id.clone()));
        assert!(matches!(
            err.work_request_error(),
            Some(WorkRequestError::DidNotSucceed { .. })
        ));
        assert!(err.to_string().contains("node unreachable\nrollback complete"));
        assert!(err.to_string().contains("workId: wr-2"));
    }

    #[tokio::test]
    async fn test_missing_work_request_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.create_resource(&patch_resource()).await.unwrap_err();
        assert!(matches!(
            err.work_request_error(),
            Some(WorkRequestError::MissingHandle { .. })
        ));
    }

    #[tokio::test]
    async fn test_action_send_retries_conflicts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "IncorrectState",
                "message": "cluster is updating"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-3"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-3"))
            .respond_with(work_request(
                "wr-3",
                "SUCCEEDED",
                json!([{"entityType": "bds", "actionType": "UPDATED", "identifier": "ocid1.bdsinstance.oc1..aaa"}]),
            ))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        assert!(provider.create_resource(&patch_resource()).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_terminated_container_database_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/20190531/autonomousContainerDatabases/ocid1.acd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ocid1.acd",
                "displayName": "main",
                "lifecycleState": "TERMINATED"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let id = ResourceId::new(AUTONOMOUS_CONTAINER_DATABASE, "main");
        let state = provider.read_resource(&id, Some("ocid1.acd")).await.unwrap();
        assert!(!state.exists);
    }

    #[tokio::test]
    async fn test_read_maps_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/20190531/databaseToolsConnections/ocid1.conn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ocid1.conn",
                "displayName": "tools",
                "lifecycleState": "ACTIVE",
                "connectionString": "db:1521/svc"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let id = ResourceId::new(DATABASE_TOOLS_CONNECTION, "conn");
        let state = provider.read_resource(&id, Some("ocid1.conn")).await.unwrap();

        assert!(state.exists);
        assert_eq!(
            state.attributes.get("connection_string"),
            Some(&Value::String("db:1521/svc".to_string()))
        );
    }

    #[tokio::test]
    async fn test_read_patch_action_is_noop() {
        let server = MockServer::start().await;
        let provider = provider_for(&server);
        let id = ResourceId::new(BDS_INSTANCE_PATCH_ACTION, "patch");

        let state = provider.read_resource(&id, Some("ocid1.bds")).await.unwrap();
        assert!(state.exists);
        assert!(!provider.read_resource(&id, None).await.unwrap().exists);
        provider
            .delete_resource(&id, "ocid1.bds", &State::not_found(id.clone()))
            .await
            .unwrap();

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_already_gone_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/20190531/databaseToolsConnections/ocid1.conn"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "NotAuthorizedOrNotFound",
                "message": "gone"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let id = ResourceId::new(DATABASE_TOOLS_CONNECTION, "conn");
        provider
            .delete_resource(&id, "ocid1.conn", &State::not_found(id.clone()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_honors_stored_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/20190531/autonomousContainerDatabases/ocid1.acd"))
            .respond_with(ResponseTemplate::new(202).insert_header("opc-work-request-id", "wr-9"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/20190531/workRequests/wr-9"))
            .respond_with(work_request("wr-9", "IN_PROGRESS", json!([])))
            .mount(&server)
            .await;

        let decl: ResourceDeclaration = serde_json::from_value(json!({
            "name": "main",
            "kind": AUTONOMOUS_CONTAINER_DATABASE,
            "compartment_id": "ocid1.compartment.oc1..aaa",
            "display_name": "main-acd",
            "cloud_autonomous_vm_cluster_id": "ocid1.cloudautonomousvmcluster.oc1..bbb",
            "patch_model": "RELEASE_UPDATES",
            "timeouts": {"delete_secs": 1}
        }))
        .unwrap();
        let resource = decl.to_resource();
        let stored = State::existing(
            resource.id.clone(),
            stored_attributes(&decl.spec, &resource),
        )
        .with_identifier("ocid1.acd");
        assert!(stored.attributes.contains_key(TIMEOUTS_ATTRIBUTE));

        let provider = provider_for(&server);
        let started = Instant::now();
        let err = provider
            .delete_resource(&resource.id, "ocid1.acd", &stored)
            .await
            .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(
            err.work_request_error().is_some_and(WorkRequestError::is_timeout),
            "{:?}",
            err
        );
        assert_eq!(err.resource_id, Some(resource.id));
    }
}
