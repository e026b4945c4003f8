//! `stratus.json` loading

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use stratus_core::resource::Resource;
use stratus_provider_oci::resources::TIMEOUTS_ATTRIBUTE;
use stratus_provider_oci::{ProviderConfig, ResourceDeclaration, SweeperConfig};
use stratus_state::{BackendConfig, StateFile};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StratusConfig {
    pub provider: ProviderConfig,
    pub backend: BackendConfig,
    pub resources: Vec<ResourceDeclaration>,
    pub sweeper: SweeperConfig,
}

impl StratusConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let mut config = Self::parse(&content)
            .map_err(|e| format!("Invalid configuration {}: {}", path.display(), e))?;
        config.provider = config.provider.apply_env();
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file falls back to defaults
    /// plus environment overrides
    pub fn load_or_default(path: &Path) -> Result<Self, String> {
        if path.exists() {
            return Self::load(path);
        }
        Ok(Self {
            provider: ProviderConfig::default().apply_env(),
            ..Self::default()
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for declaration in &self.resources {
            if declaration.name.is_empty() {
                return Err(format!("{} declared without a name", declaration.spec.kind()));
            }
            if !seen.insert(declaration.id()) {
                return Err(format!("duplicate resource {}", declaration.id()));
            }
        }
        Ok(())
    }

    /// Desired resources in declaration order
    pub fn desired_resources(&self) -> Vec<Resource> {
        self.resources
            .iter()
            .map(ResourceDeclaration::to_resource)
            .collect()
    }

    pub fn declaration(&self, resource: &Resource) -> Option<&ResourceDeclaration> {
        self.resources.iter().find(|d| d.id() == resource.id)
    }

    /// Copy the declared timeout overrides onto the stored resources, so
    /// deletes planned from state wait as long as the configuration asks.
    /// Resources no longer declared keep what was stored.
    pub fn sync_timeouts(&self, state: &mut StateFile) {
        for stored in &mut state.resources {
            let id = stored.resource_id();
            let Some(declaration) = self.resources.iter().find(|d| d.id() == id) else {
                continue;
            };
            match declaration.timeouts.to_attribute() {
                Some(timeouts) => {
                    stored
                        .attributes
                        .insert(TIMEOUTS_ATTRIBUTE.to_string(), timeouts.to_json());
                }
                None => {
                    stored.attributes.remove(TIMEOUTS_ATTRIBUTE);
                }
            }
        }
    }
}
