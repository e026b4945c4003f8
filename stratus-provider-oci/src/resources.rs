//! Resource kinds managed by the OCI provider
//!
//! This module defines:
//! - Resource type definitions (implementing the ResourceType trait)
//! - The typed declaration of each kind, decoded once from configuration
//! - The REST call and work request expectations of each operation

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stratus_core::ActionType;
use stratus_core::provider::{ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, Value, attributes_from_json};

use crate::client::ApiRequest;

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr, entity: $entity:expr, update: $update:expr, sensitive: [$($sensitive:expr),*], create_only: [$($create_only:expr),*]) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn entity_type(&self) -> &'static str {
                $entity
            }
            fn supports_update(&self) -> bool {
                $update
            }
            fn sensitive_attributes(&self) -> &'static [&'static str] {
                &[$($sensitive),*]
            }
            fn create_only_attributes(&self) -> &'static [&'static str] {
                &[$($create_only),*]
            }
        }
    };
}

define_resource_type!(
    BdsInstancePatchActionType,
    BDS_INSTANCE_PATCH_ACTION,
    entity: "bds",
    update: false,
    sensitive: ["cluster_admin_password"],
    create_only: []
);
define_resource_type!(
    AutonomousContainerDatabaseType,
    AUTONOMOUS_CONTAINER_DATABASE,
    entity: "autonomouscontainerdatabase",
    update: true,
    sensitive: [],
    create_only: [
        "compartment_id",
        "cloud_autonomous_vm_cluster_id",
        "autonomous_vm_cluster_id",
        "service_level_agreement_type"
    ]
);
define_resource_type!(
    DatabaseToolsConnectionType,
    DATABASE_TOOLS_CONNECTION,
    entity: "databasetoolsconnection",
    update: true,
    sensitive: [],
    create_only: ["compartment_id"]
);

pub const BDS_INSTANCE_PATCH_ACTION: &str = "bds_instance_patch_action";
pub const AUTONOMOUS_CONTAINER_DATABASE: &str = "autonomous_container_database";
pub const DATABASE_TOOLS_CONNECTION: &str = "database_tools_connection";

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(BdsInstancePatchActionType),
        Box::new(AutonomousContainerDatabaseType),
        Box::new(DatabaseToolsConnectionType),
    ]
}

/// Find the definition of a resource type by name
pub fn find_resource_type(name: &str) -> Option<Box<dyn ResourceType>> {
    resource_types().into_iter().find(|t| t.name() == name)
}

// =============================================================================
// Timeouts
// =============================================================================

/// Per-resource overrides from configuration, in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_secs: Option<u64>,
}

impl Timeouts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay these overrides on a kind's defaults
    pub fn resolve(&self, defaults: OperationTimeouts) -> OperationTimeouts {
        OperationTimeouts {
            create: self.create_secs.map(Duration::from_secs).unwrap_or(defaults.create),
            update: self.update_secs.map(Duration::from_secs).unwrap_or(defaults.update),
            delete: self.delete_secs.map(Duration::from_secs).unwrap_or(defaults.delete),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl OperationTimeouts {
    pub const fn minutes(create: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }
}

/// Attribute holding the timeout overrides of a declared resource.
/// The leading underscore keeps it out of diffs.
pub const TIMEOUTS_ATTRIBUTE: &str = "_timeouts";

// =============================================================================
// Typed Declarations
// =============================================================================

/// Install a patch on a Big Data Service cluster.
///
/// An action rather than an entity: there is nothing to read back or delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BdsInstancePatchAction {
    pub bds_instance_id: String,
    pub cluster_admin_password: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchModel {
    ReleaseUpdates,
    ReleaseUpdateRevisions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomousContainerDatabase {
    pub compartment_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_autonomous_vm_cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomous_vm_cluster_id: Option<String>,
    pub patch_model: PatchModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_level_agreement_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseToolsConnection {
    pub compartment_id: String,
    pub display_name: String,
    /// Connection type (e.g., "ORACLE_DATABASE", "MYSQL")
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Vault secret holding the password; the password itself is never declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_password_secret_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub freeform_tags: BTreeMap<String, String>,
}

/// Typed configuration of one resource, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    BdsInstancePatchAction(BdsInstancePatchAction),
    AutonomousContainerDatabase(AutonomousContainerDatabase),
    DatabaseToolsConnection(DatabaseToolsConnection),
}

/// The REST call that starts an operation and what its work request must show
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub request: ApiRequest,
    pub entity_type: &'static str,
    pub action: ActionType,
}

impl ResourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BdsInstancePatchAction(_) => BDS_INSTANCE_PATCH_ACTION,
            Self::AutonomousContainerDatabase(_) => AUTONOMOUS_CONTAINER_DATABASE,
            Self::DatabaseToolsConnection(_) => DATABASE_TOOLS_CONNECTION,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::BdsInstancePatchAction(_) => "bds",
            Self::AutonomousContainerDatabase(_) => "autonomouscontainerdatabase",
            Self::DatabaseToolsConnection(_) => "databasetoolsconnection",
        }
    }

    pub fn default_timeouts(&self) -> OperationTimeouts {
        default_timeouts(self.kind())
    }

    /// Whether the kind is an action with no readable or deletable entity
    pub fn is_action(&self) -> bool {
        matches!(self, Self::BdsInstancePatchAction(_))
    }

    /// Decode the typed declaration back out of a resource's attributes
    pub fn from_resource(resource: &Resource) -> ProviderResult<Self> {
        let mut object = serde_json::Map::new();
        for (key, value) in &resource.attributes {
            if !key.starts_with('_') {
                object.insert(key.clone(), value.to_json());
            }
        }
        object.insert(
            "kind".to_string(),
            serde_json::Value::String(resource.id.resource_type.clone()),
        );

        serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
            ProviderError::new(format!("Invalid {} declaration: {}", resource.id.resource_type, e))
                .for_resource(resource.id.clone())
        })
    }

    /// Declared attributes, without the `kind` tag
    pub fn attributes(&self) -> HashMap<String, Value> {
        let mut json = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = json.as_object_mut() {
            map.remove("kind");
        }
        attributes_from_json(&json)
    }

    pub fn create(&self) -> Operation {
        let (request, action) = match self {
            Self::BdsInstancePatchAction(patch) => (
                ApiRequest::post(format!(
                    "/bdsInstances/{}/actions/installPatch",
                    patch.bds_instance_id
                ))
                .with_body(serde_json::json!({
                    "version": patch.version,
                    "clusterAdminPassword": patch.cluster_admin_password,
                })),
                ActionType::Updated,
            ),
            Self::AutonomousContainerDatabase(acd) => (
                ApiRequest::post("/autonomousContainerDatabases").with_body(acd.create_body()),
                ActionType::Created,
            ),
            Self::DatabaseToolsConnection(conn) => (
                ApiRequest::post("/databaseToolsConnections").with_body(conn.create_body()),
                ActionType::Created,
            ),
        };

        Operation {
            request: request.with_retry_token(),
            entity_type: self.entity_type(),
            action,
        }
    }

    /// In-place update, if the kind supports one
    pub fn update(&self, identifier: &str) -> Option<Operation> {
        let request = match self {
            Self::BdsInstancePatchAction(_) => return None,
            Self::AutonomousContainerDatabase(acd) => {
                ApiRequest::put(format!("/autonomousContainerDatabases/{}", identifier))
                    .with_body(acd.update_body())
            }
            Self::DatabaseToolsConnection(conn) => {
                ApiRequest::put(format!("/databaseToolsConnections/{}", identifier))
                    .with_body(conn.update_body())
            }
        };

        Some(Operation {
            request,
            entity_type: self.entity_type(),
            action: ActionType::Updated,
        })
    }

    pub fn delete(&self, identifier: &str) -> Option<Operation> {
        delete_operation(self.kind(), identifier)
    }
}

/// Timeouts used when a declaration does not override them
pub fn default_timeouts(kind: &str) -> OperationTimeouts {
    match kind {
        BDS_INSTANCE_PATCH_ACTION => OperationTimeouts::minutes(60, 20, 20),
        AUTONOMOUS_CONTAINER_DATABASE => OperationTimeouts::minutes(720, 720, 720),
        _ => OperationTimeouts::minutes(20, 20, 20),
    }
}

/// Delete of a stored entity. Needs only the kind, since the declaration
/// may already be gone from configuration.
pub fn delete_operation(kind: &str, identifier: &str) -> Option<Operation> {
    let resource_type = find_resource_type(kind)?;
    entity_path(kind, identifier).map(|path| Operation {
        request: ApiRequest::delete(path),
        entity_type: resource_type.entity_type(),
        action: ActionType::Deleted,
    })
}

impl AutonomousContainerDatabase {
    fn create_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "compartmentId": self.compartment_id,
            "displayName": self.display_name,
            "patchModel": self.patch_model,
        });
        insert_opt(&mut body, "cloudAutonomousVmClusterId", &self.cloud_autonomous_vm_cluster_id);
        insert_opt(&mut body, "autonomousVmClusterId", &self.autonomous_vm_cluster_id);
        insert_opt(&mut body, "serviceLevelAgreementType", &self.service_level_agreement_type);
        insert_tags(&mut body, &self.freeform_tags);
        body
    }

    fn update_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "displayName": self.display_name,
            "patchModel": self.patch_model,
        });
        insert_tags(&mut body, &self.freeform_tags);
        body
    }
}

impl DatabaseToolsConnection {
    fn create_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "compartmentId": self.compartment_id,
            "displayName": self.display_name,
            "type": self.connection_type,
        });
        self.insert_credentials(&mut body);
        insert_tags(&mut body, &self.freeform_tags);
        body
    }

    fn update_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "displayName": self.display_name,
            "type": self.connection_type,
        });
        self.insert_credentials(&mut body);
        insert_tags(&mut body, &self.freeform_tags);
        body
    }

    fn insert_credentials(&self, body: &mut serde_json::Value) {
        insert_opt(body, "userName", &self.user_name);
        insert_opt(body, "connectionString", &self.connection_string);
        if let Some(secret_id) = &self.user_password_secret_id {
            body["userPassword"] = serde_json::json!({
                "valueType": "SECRETID",
                "secretId": secret_id,
            });
        }
    }
}

fn insert_opt(body: &mut serde_json::Value, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        body[key] = serde_json::Value::String(value.clone());
    }
}

fn insert_tags(body: &mut serde_json::Value, tags: &BTreeMap<String, String>) {
    if !tags.is_empty() {
        body["freeformTags"] = serde_json::json!(tags);
    }
}

/// REST path of an existing entity, for kinds that have one
pub fn entity_path(kind: &str, identifier: &str) -> Option<String> {
    match kind {
        AUTONOMOUS_CONTAINER_DATABASE => {
            Some(format!("/autonomousContainerDatabases/{}", identifier))
        }
        DATABASE_TOOLS_CONNECTION => Some(format!("/databaseToolsConnections/{}", identifier)),
        _ => None,
    }
}

/// Lifecycle states in which an entity counts as gone
pub fn is_deleted_lifecycle(state: &str) -> bool {
    matches!(state, "TERMINATED" | "DELETED")
}

// =============================================================================
// Declarations in configuration
// =============================================================================

/// One entry of the `resources` list in `stratus.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
    #[serde(default, skip_serializing_if = "Timeouts::is_empty")]
    pub timeouts: Timeouts,
    /// Kept out of `destroy` and `sweep`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub protected: bool,
}

impl ResourceDeclaration {
    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.spec.kind(), &self.name)
    }

    /// The declaration as a core resource for diffing and the provider
    pub fn to_resource(&self) -> Resource {
        let mut resource = Resource {
            id: self.id(),
            attributes: self.spec.attributes(),
        };
        if let Some(overrides) = self.timeouts.to_attribute() {
            resource
                .attributes
                .insert(TIMEOUTS_ATTRIBUTE.to_string(), overrides);
        }
        resource
    }
}

impl Timeouts {
    /// The value stored under [`TIMEOUTS_ATTRIBUTE`], if there is any override
    pub fn to_attribute(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let overrides = serde_json::to_value(self).ok()?;
        Some(Value::Map(attributes_from_json(&overrides)))
    }
}

/// Timeout overrides carried by a resource built with [`ResourceDeclaration::to_resource`]
pub fn timeouts_of(resource: &Resource) -> Timeouts {
    timeouts_in(&resource.attributes)
}

/// Timeout overrides stored in a set of attributes, such as a resource's state
pub fn timeouts_in(attributes: &HashMap<String, Value>) -> Timeouts {
    attributes
        .get(TIMEOUTS_ATTRIBUTE)
        .and_then(|value| serde_json::from_value(value.to_json()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn acd_declaration() -> ResourceDeclaration {
        serde_json::from_value(json!({
            "name": "main",
            "kind": "autonomous_container_database",
            "compartment_id": "ocid1.compartment.oc1..aaa",
            "display_name": "containerdatabases2",
            "cloud_autonomous_vm_cluster_id": "ocid1.cloudautonomousvmcluster.oc1..bbb",
            "patch_model": "RELEASE_UPDATES",
            "freeform_tags": {"Department": "Finance"},
            "timeouts": {"create_secs": 3600}
        }))
        .unwrap()
    }

    #[test]
    fn test_resource_types() {
        let types = resource_types();
        assert_eq!(types.len(), 3);

        let patch = find_resource_type(BDS_INSTANCE_PATCH_ACTION).unwrap();
        assert_eq!(patch.entity_type(), "bds");
        assert!(!patch.supports_update());
        assert_eq!(patch.sensitive_attributes(), &["cluster_admin_password"]);

        assert!(find_resource_type("vcn").is_none());
    }

    #[test]
    fn test_declaration_decodes_by_kind() {
        let decl = acd_declaration();
        assert_eq!(decl.id().to_string(), "autonomous_container_database.main");
        match &decl.spec {
            ResourceSpec::AutonomousContainerDatabase(acd) => {
                assert_eq!(acd.patch_model, PatchModel::ReleaseUpdates);
                assert_eq!(acd.freeform_tags["Department"], "Finance");
            }
            other => panic!("Expected container database, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result: Result<ResourceDeclaration, _> =
            serde_json::from_value(json!({"name": "x", "kind": "vcn"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_timeouts_overlay_defaults() {
        let decl = acd_declaration();
        let timeouts = decl.timeouts.resolve(decl.spec.default_timeouts());
        assert_eq!(timeouts.create, Duration::from_secs(3600));
        assert_eq!(timeouts.update, Duration::from_secs(12 * 60 * 60));
    }

    #[test]
    fn test_resource_round_trips_through_attributes() {
        let decl = acd_declaration();
        let resource = decl.to_resource();

        assert!(resource.attributes.contains_key(TIMEOUTS_ATTRIBUTE));
        assert_eq!(timeouts_of(&resource), decl.timeouts);
        assert_eq!(ResourceSpec::from_resource(&resource).unwrap(), decl.spec);
    }

    #[test]
    fn test_timeouts_read_back_from_state_attributes() {
        let timeouts = Timeouts {
            delete_secs: Some(90),
            ..Timeouts::default()
        };
        let mut attributes = HashMap::new();
        attributes.insert(TIMEOUTS_ATTRIBUTE.to_string(), timeouts.to_attribute().unwrap());

        assert_eq!(timeouts_in(&attributes), timeouts);
        assert_eq!(timeouts_in(&HashMap::new()), Timeouts::default());
        assert!(Timeouts::default().to_attribute().is_none());
    }

    #[test]
    fn test_create_only_attributes_force_replacement() {
        let acd = find_resource_type(AUTONOMOUS_CONTAINER_DATABASE).unwrap();
        assert!(acd.create_only_attributes().contains(&"compartment_id"));
        assert!(!acd.create_only_attributes().contains(&"display_name"));

        let connection = find_resource_type(DATABASE_TOOLS_CONNECTION).unwrap();
        assert_eq!(connection.create_only_attributes(), &["compartment_id"]);
    }

    #[test]
    fn test_plan_replaces_container_database_moved_between_compartments() {
        use stratus_core::differ::create_plan;
        use stratus_core::effect::Effect;
        use stratus_core::resource::State;

        let decl = acd_declaration();
        let stored = State::existing(decl.id(), decl.spec.attributes()).with_identifier("ocid1.acd");
        let current = HashMap::from([(decl.id(), stored)]);
        let order = vec![decl.id()];

        let mut renamed = decl.to_resource();
        renamed.attributes.insert(
            "display_name".to_string(),
            Value::String("renamed".to_string()),
        );
        let plan = create_plan(&[renamed], &current, &order, &resource_types());
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan.effects()[0], Effect::Update { .. }));

        let mut moved = decl.to_resource();
        moved.attributes.insert(
            "compartment_id".to_string(),
            Value::String("ocid1.compartment.oc1..zzz".to_string()),
        );
        let plan = create_plan(&[moved], &current, &order, &resource_types());
        assert_eq!(plan.len(), 2);
        assert!(matches!(plan.effects()[0], Effect::Delete { .. }));
        assert!(matches!(plan.effects()[1], Effect::Create(_)));
    }

    #[test]
    fn test_from_resource_reports_missing_fields() {
        let resource = Resource::new(BDS_INSTANCE_PATCH_ACTION, "patch")
            .with_attribute("version", Value::String("3.0.2".to_string()));

        let err = ResourceSpec::from_resource(&resource).unwrap_err();
        assert!(err.to_string().contains("bds_instance_id"));
        assert_eq!(err.resource_id, Some(resource.id));
    }

    #[test]
    fn test_patch_action_create_request() {
        let spec = ResourceSpec::BdsInstancePatchAction(BdsInstancePatchAction {
            bds_instance_id: "ocid1.bdsinstance.oc1..ccc".to_string(),
            cluster_admin_password: "secret".to_string(),
            version: "3.0.2".to_string(),
        });

        let op = spec.create();
        assert_eq!(
            op.request.path,
            "/bdsInstances/ocid1.bdsinstance.oc1..ccc/actions/installPatch"
        );
        assert_eq!(op.entity_type, "bds");
        assert_eq!(op.action, ActionType::Updated);
        assert!(op.request.retry_token.is_some());
        assert_eq!(
            op.request.body,
            Some(json!({"version": "3.0.2", "clusterAdminPassword": "secret"}))
        );

        assert!(spec.is_action());
        assert!(spec.update("x").is_none());
        assert!(spec.delete("x").is_none());
    }

    #[test]
    fn test_container_database_requests() {
        let spec = acd_declaration().spec;

        let create = spec.create();
        let body = create.request.body.unwrap();
        assert_eq!(body["patchModel"], "RELEASE_UPDATES");
        assert_eq!(
            body["cloudAutonomousVmClusterId"],
            "ocid1.cloudautonomousvmcluster.oc1..bbb"
        );
        assert!(body.get("autonomousVmClusterId").is_none());

        let update = spec.update("ocid1.acd").unwrap();
        assert_eq!(update.request.path, "/autonomousContainerDatabases/ocid1.acd");
        assert_eq!(update.action, ActionType::Updated);

        let delete = spec.delete("ocid1.acd").unwrap();
        assert_eq!(delete.action, ActionType::Deleted);
        assert_eq!(delete.request.method, reqwest::Method::DELETE);
    }

    #[test]
    fn test_connection_password_is_a_secret_reference() {
        let decl: ResourceDeclaration = serde_json::from_value(json!({
            "name": "conn",
            "kind": "database_tools_connection",
            "compartment_id": "ocid1.compartment.oc1..aaa",
            "display_name": "tools",
            "type": "ORACLE_DATABASE",
            "user_name": "admin",
            "user_password_secret_id": "ocid1.vaultsecret.oc1..ddd"
        }))
        .unwrap();

        let body = decl.spec.create().request.body.unwrap();
        assert_eq!(body["type"], "ORACLE_DATABASE");
        assert_eq!(body["userPassword"]["secretId"], "ocid1.vaultsecret.oc1..ddd");
        assert_eq!(decl.to_resource().attributes["type"], Value::String("ORACLE_DATABASE".to_string()));
    }
}
