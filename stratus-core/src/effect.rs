//! Effect - A single side effect to perform against the control plane

use crate::resource::{Resource, ResourceId, State};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Create a resource and record the identifier its work request reports
    Create(Resource),
    /// Apply changed attributes in place
    Update {
        id: ResourceId,
        identifier: String,
        from: State,
        to: Resource,
    },
    /// Delete the entity behind `identifier`. `from` is the stored state,
    /// which carries any per-resource settings the delete needs.
    Delete {
        id: ResourceId,
        identifier: String,
        from: State,
    },
}

impl Effect {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            Effect::Create(r) => &r.id,
            Effect::Update { id, .. } | Effect::Delete { id, .. } => id,
        }
    }

    /// Short form used in plan output (e.g., "+ autonomous_container_database.main")
    pub fn brief(&self) -> String {
        let symbol = match self {
            Effect::Create(_) => '+',
            Effect::Update { .. } => '~',
            Effect::Delete { .. } => '-',
        };
        format!("{} {}", symbol, self.resource_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brief_format() {
        let create = Effect::Create(Resource::new("database_tools_connection", "conn"));
        assert_eq!(create.brief(), "+ database_tools_connection.conn");

        let id = ResourceId::new("autonomous_container_database", "acd");
        let delete = Effect::Delete {
            id: id.clone(),
            identifier: "ocid1.acd".to_string(),
            from: State::not_found(id),
        };
        assert_eq!(delete.brief(), "- autonomous_container_database.acd");
    }
}
