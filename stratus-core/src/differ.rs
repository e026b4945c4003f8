//! Differ - Compare desired state with current state to generate a Plan
//!
//! Compares the desired resources declared in configuration with the stored
//! state of each resource, and generates the list of Effects (Plan) needed
//! to reconcile them.

use std::collections::HashMap;

use crate::effect::Effect;
use crate::plan::Plan;
use crate::provider::ResourceType;
use crate::resource::{Resource, ResourceId, State, Value};

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with differences that cannot be applied in place
    Replace {
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange(_))
    }
}

/// How a resource type may be diffed
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffRules {
    pub supports_update: bool,
    pub sensitive: &'static [&'static str],
    pub create_only: &'static [&'static str],
}

impl DiffRules {
    pub fn for_type(resource_type: &dyn ResourceType) -> Self {
        Self {
            supports_update: resource_type.supports_update(),
            sensitive: resource_type.sensitive_attributes(),
            create_only: resource_type.create_only_attributes(),
        }
    }
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, rules: DiffRules) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed =
        find_changed_attributes(&desired.attributes, &current.attributes, rules.sensitive);

    let in_place = rules.supports_update
        && !changed
            .iter()
            .any(|key| rules.create_only.contains(&key.as_str()));

    if changed.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else if in_place {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Replace {
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    sensitive: &[&str],
) -> Vec<String> {
    let mut changed = Vec::new();

    for (key, desired_value) in desired {
        // Skip internal attributes (starting with _)
        if key.starts_with('_') || sensitive.contains(&key.as_str()) {
            continue;
        }

        match current.get(key) {
            Some(current_value) if current_value == desired_value => {}
            _ => changed.push(key.clone()),
        }
    }

    changed.sort();
    changed
}

/// Compute Diff for multiple resources and generate a Plan
///
/// Stored resources that are no longer desired are deleted after every
/// create and update, in reverse order of `current_order`.
pub fn create_plan(
    desired: &[Resource],
    current_states: &HashMap<ResourceId, State>,
    current_order: &[ResourceId],
    resource_types: &[Box<dyn ResourceType>],
) -> Plan {
    let mut plan = Plan::new();

    for resource in desired {
        let current = current_states
            .get(&resource.id)
            .cloned()
            .unwrap_or_else(|| State::not_found(resource.id.clone()));

        let rules = resource_types
            .iter()
            .find(|t| t.name() == resource.id.resource_type)
            .map(|t| DiffRules::for_type(t.as_ref()))
            .unwrap_or_default();

        match diff(resource, &current, rules) {
            Diff::Create(r) => plan.add(Effect::Create(r)),
            Diff::Update { id, from, to, .. } => match from.identifier.clone() {
                Some(identifier) => plan.add(Effect::Update {
                    id,
                    identifier,
                    from,
                    to,
                }),
                None => plan.add(Effect::Create(to)),
            },
            Diff::Replace { from, to, .. } => {
                if let Some(identifier) = from.identifier.clone() {
                    plan.add(Effect::Delete {
                        id: from.id.clone(),
                        identifier,
                        from,
                    });
                }
                plan.add(Effect::Create(to));
            }
            Diff::NoChange(_) => {}
        }
    }

    for id in current_order.iter().rev() {
        if desired.iter().any(|r| &r.id == id) {
            continue;
        }
        if let Some(delete) = delete_effect(id, current_states) {
            plan.add(delete);
        }
    }

    plan
}

/// Plan deleting every stored resource, newest first
pub fn destroy_plan(current_states: &HashMap<ResourceId, State>, order: &[ResourceId]) -> Plan {
    let mut plan = Plan::new();
    for id in order.iter().rev() {
        if let Some(delete) = delete_effect(id, current_states) {
            plan.add(delete);
        }
    }
    plan
}

fn delete_effect(id: &ResourceId, current_states: &HashMap<ResourceId, State>) -> Option<Effect> {
    let from = current_states.get(id)?;
    Some(Effect::Delete {
        id: id.clone(),
        identifier: from.identifier.clone()?,
        from: from.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Updatable;

    impl ResourceType for Updatable {
        fn name(&self) -> &'static str {
            "database_tools_connection"
        }

        fn entity_type(&self) -> &'static str {
            "databasetoolsconnection"
        }

        fn supports_update(&self) -> bool {
            true
        }

        fn sensitive_attributes(&self) -> &'static [&'static str] {
            &["password"]
        }

        fn create_only_attributes(&self) -> &'static [&'static str] {
            &["compartment_id"]
        }
    }

    fn existing(resource_type: &str, name: &str, attrs: &[(&str, Value)]) -> State {
        let attrs = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        State::existing(ResourceId::new(resource_type, name), attrs)
            .with_identifier(format!("ocid1.{}", name))
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("database_tools_connection", "test");
        let current = State::not_found(ResourceId::new("database_tools_connection", "test"));

        let result = diff(&desired, &current, DiffRules::default());
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_when_same() {
        let desired = Resource::new("database_tools_connection", "test")
            .with_attribute("display_name", Value::String("conn".to_string()));
        let current = existing(
            "database_tools_connection",
            "test",
            &[("display_name", Value::String("conn".to_string()))],
        );

        let result = diff(&desired, &current, DiffRules::default());
        assert!(!result.is_change());
    }

    #[test]
    fn diff_ignores_sensitive_attributes() {
        let desired = Resource::new("database_tools_connection", "test")
            .with_attribute("password", Value::String("secret".to_string()));
        let current = existing("database_tools_connection", "test", &[]);

        let result = diff(&desired, &current, DiffRules::for_type(&Updatable));
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_replace_when_update_unsupported() {
        let desired = Resource::new("bds_instance_patch_action", "patch")
            .with_attribute("version", Value::String("3.0.2".to_string()));
        let current = existing(
            "bds_instance_patch_action",
            "patch",
            &[("version", Value::String("3.0.1".to_string()))],
        );

        match diff(&desired, &current, DiffRules::default()) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(changed_attributes, vec!["version".to_string()]),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_when_create_only_attribute_changes() {
        let desired = Resource::new("database_tools_connection", "test")
            .with_attribute("compartment_id", Value::String("ocid1.compartment.b".to_string()))
            .with_attribute("display_name", Value::String("renamed".to_string()));
        let current = existing(
            "database_tools_connection",
            "test",
            &[
                ("compartment_id", Value::String("ocid1.compartment.a".to_string())),
                ("display_name", Value::String("conn".to_string())),
            ],
        );

        match diff(&desired, &current, DiffRules::for_type(&Updatable)) {
            Diff::Replace {
                changed_attributes, ..
            } => assert_eq!(
                changed_attributes,
                vec!["compartment_id".to_string(), "display_name".to_string()]
            ),
            other => panic!("Expected Replace, got {:?}", other),
        }
    }

    #[test]
    fn replace_deletes_with_stored_state() {
        let types: Vec<Box<dyn ResourceType>> = vec![Box::new(Updatable)];
        let id = ResourceId::new("database_tools_connection", "moved");
        let stored = existing(
            "database_tools_connection",
            "moved",
            &[
                ("compartment_id", Value::String("ocid1.compartment.a".to_string())),
                ("_timeouts", Value::Map(HashMap::new())),
            ],
        );
        let mut current_states = HashMap::new();
        current_states.insert(id.clone(), stored.clone());

        let desired = vec![
            Resource::new("database_tools_connection", "moved")
                .with_attribute("compartment_id", Value::String("ocid1.compartment.b".to_string())),
        ];
        let plan = create_plan(&desired, &current_states, &[id], &types);

        assert_eq!(plan.len(), 2);
        match &plan.effects()[0] {
            Effect::Delete {
                identifier, from, ..
            } => {
                assert_eq!(identifier, "ocid1.moved");
                assert_eq!(from, &stored);
            }
            other => panic!("Expected Delete, got {:?}", other),
        }
        assert!(matches!(plan.effects()[1], Effect::Create(_)));
    }

    #[test]
    fn create_plan_from_resources() {
        let types: Vec<Box<dyn ResourceType>> = vec![Box::new(Updatable)];
        let resources = vec![
            Resource::new("database_tools_connection", "new"),
            Resource::new("database_tools_connection", "changed")
                .with_attribute("display_name", Value::String("after".to_string())),
        ];

        let changed_id = ResourceId::new("database_tools_connection", "changed");
        let stale_id = ResourceId::new("database_tools_connection", "stale");
        let mut current_states = HashMap::new();
        current_states.insert(
            changed_id.clone(),
            existing(
                "database_tools_connection",
                "changed",
                &[("display_name", Value::String("before".to_string()))],
            ),
        );
        current_states.insert(
            stale_id.clone(),
            existing("database_tools_connection", "stale", &[]),
        );

        let plan = create_plan(
            &resources,
            &current_states,
            &[changed_id, stale_id],
            &types,
        );

        assert_eq!(plan.len(), 3);
        assert!(matches!(plan.effects()[0], Effect::Create(_)));
        assert!(matches!(plan.effects()[1], Effect::Update { .. }));
        match &plan.effects()[2] {
            Effect::Delete { identifier, .. } => assert_eq!(identifier, "ocid1.stale"),
            other => panic!("Expected Delete, got {:?}", other),
        }
    }

    #[test]
    fn destroy_plan_deletes_in_reverse_order() {
        let first = ResourceId::new("autonomous_container_database", "acd");
        let second = ResourceId::new("database_tools_connection", "conn");
        let mut current_states = HashMap::new();
        current_states.insert(
            first.clone(),
            existing("autonomous_container_database", "acd", &[]),
        );
        current_states.insert(
            second.clone(),
            existing("database_tools_connection", "conn", &[]),
        );

        let plan = destroy_plan(&current_states, &[first.clone(), second.clone()]);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.effects()[0].resource_id(), &second);
        assert_eq!(plan.effects()[1].resource_id(), &first);
    }
}
