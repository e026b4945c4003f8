//! Sweeper - Remove leftover resources from a test compartment
//!
//! Lists the live entities of every sweepable kind, terminates each one that
//! is not protected, and waits a short while for it to reach a deleted
//! lifecycle state. Kinds are swept in dependency order. A failure on one
//! entity is recorded and the sweep moves on.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;
use stratus_core::{WaitOutcome, wait_while};
use thiserror::Error;

use crate::client::{ApiRequest, ServiceClient, list_all};
use crate::provider::{EntitySummary, OciProvider};
use crate::resources::{AUTONOMOUS_CONTAINER_DATABASE, DATABASE_TOOLS_CONNECTION, delete_operation};

/// Kinds the sweeper knows how to list and terminate
pub const SWEEPABLE_KINDS: &[&str] = &[DATABASE_TOOLS_CONNECTION, AUTONOMOUS_CONTAINER_DATABASE];

pub const DEFAULT_SWEEP_WAIT: Duration = Duration::from_secs(3 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("sweeper dependencies form a cycle through {0}")]
    DependencyCycle(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Kinds that are never swept
    pub exclude: HashSet<String>,
    /// `kind -> kinds swept before it` (dependents go first)
    pub dependencies: HashMap<String, Vec<String>>,
    /// Identifiers that must survive the sweep
    pub protected_ids: HashSet<String>,
    /// How long to wait for each terminated entity to disappear
    pub wait_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        let mut dependencies = HashMap::new();
        // Tools connections commonly point at databases in the same container
        dependencies.insert(
            AUTONOMOUS_CONTAINER_DATABASE.to_string(),
            vec![DATABASE_TOOLS_CONNECTION.to_string()],
        );

        Self {
            exclude: HashSet::new(),
            dependencies,
            protected_ids: HashSet::new(),
            wait_secs: DEFAULT_SWEEP_WAIT.as_secs(),
        }
    }
}

impl SweeperConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

/// Order `kinds` so every kind comes after the kinds it lists as dependencies.
///
/// Excluded kinds are dropped. Dependencies on kinds outside `kinds` are ignored.
pub fn sweep_order<'a>(
    kinds: &[&'a str],
    dependencies: &HashMap<String, Vec<String>>,
    exclude: &HashSet<String>,
) -> Result<Vec<&'a str>, SweepError> {
    fn visit<'a>(
        kind: &'a str,
        kinds: &[&'a str],
        dependencies: &HashMap<String, Vec<String>>,
        visiting: &mut Vec<&'a str>,
        done: &mut Vec<&'a str>,
    ) -> Result<(), SweepError> {
        if done.contains(&kind) {
            return Ok(());
        }
        if visiting.contains(&kind) {
            return Err(SweepError::DependencyCycle(kind.to_string()));
        }
        visiting.push(kind);

        for dep in dependencies.get(kind).into_iter().flatten() {
            if let Some(dep) = kinds.iter().copied().find(|k| *k == dep.as_str()) {
                visit(dep, kinds, dependencies, visiting, done)?;
            }
        }

        visiting.pop();
        done.push(kind);
        Ok(())
    }

    let mut done = Vec::new();
    for &kind in kinds {
        visit(kind, kinds, dependencies, &mut Vec::new(), &mut done)?;
    }
    done.retain(|kind| !exclude.contains(*kind));
    Ok(done)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptEntity {
    pub kind: &'static str,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub kind: &'static str,
    /// `None` when listing the kind failed
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub deleted: Vec<SweptEntity>,
    pub protected: Vec<SweptEntity>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Sweeper<'a, C> {
    provider: &'a OciProvider<C>,
    config: SweeperConfig,
}

impl<'a, C: ServiceClient> Sweeper<'a, C> {
    pub fn new(provider: &'a OciProvider<C>, config: SweeperConfig) -> Self {
        Self { provider, config }
    }

    pub async fn sweep(&self, compartment_id: &str) -> Result<SweepReport, SweepError> {
        let order = sweep_order(
            SWEEPABLE_KINDS,
            &self.config.dependencies,
            &self.config.exclude,
        )?;
        let mut report = SweepReport::default();

        for kind in order {
            info!("Sweeping {} in {}", kind, compartment_id);
            let entities = match self.list(kind, compartment_id).await {
                Ok(entities) => entities,
                Err(message) => {
                    warn!("Could not list {}: {}", kind, message);
                    report.failed.push(SweepFailure {
                        kind,
                        id: None,
                        message,
                    });
                    continue;
                }
            };

            for entity in entities {
                let swept = SweptEntity {
                    kind,
                    id: entity.id.clone(),
                };
                if self.config.protected_ids.contains(&entity.id) {
                    info!("Keeping protected {} {}", kind, entity.id);
                    report.protected.push(swept);
                    continue;
                }

                match self.terminate(kind, &entity).await {
                    Ok(()) => report.deleted.push(swept),
                    Err(message) => report.failed.push(SweepFailure {
                        kind,
                        id: Some(entity.id),
                        message,
                    }),
                }
            }
        }

        Ok(report)
    }

    async fn list(&self, kind: &str, compartment_id: &str) -> Result<Vec<EntitySummary>, String> {
        let request = list_request(kind, compartment_id)
            .ok_or_else(|| format!("{} cannot be listed", kind))?;
        list_all(self.provider.client(), request)
            .await
            .map_err(|e| e.to_string())
    }

    async fn terminate(&self, kind: &'static str, entity: &EntitySummary) -> Result<(), String> {
        let id = entity.id.as_str();
        let operation = delete_operation(kind, id).ok_or_else(|| format!("{} cannot be deleted", kind))?;

        if let Err(err) = self.provider.send_with_retry(operation.request, false).await {
            if err.is_not_found() {
                return Ok(());
            }
            warn!(
                "Error deleting {} {}: {}. It is possible that the resource is already deleted, please verify manually",
                kind, id, err
            );
            return Err(err.to_string());
        }

        let policy = self
            .provider
            .poller()
            .policy()
            .clone()
            .with_max_elapsed(self.config.wait_timeout());
        let provider = self.provider;

        match wait_while(&policy, move || provider.get_entity(kind, id), Option::is_some).await {
            WaitOutcome::Done(_) => {
                info!(
                    "Deleted {} {} ({})",
                    kind,
                    id,
                    entity.display_name.as_deref().unwrap_or("unnamed")
                );
                Ok(())
            }
            WaitOutcome::TimedOut(_) => {
                warn!(
                    "{} {} still present after {:?}; manual intervention may be required",
                    kind,
                    id,
                    self.config.wait_timeout()
                );
                Err(format!(
                    "still present after {:?}",
                    self.config.wait_timeout()
                ))
            }
            WaitOutcome::Failed(err) => Err(err.to_string()),
        }
    }
}

/// List call for the live entities of `kind` in a compartment
fn list_request(kind: &str, compartment_id: &str) -> Option<ApiRequest> {
    let (path, live_state) = match kind {
        AUTONOMOUS_CONTAINER_DATABASE => ("/autonomousContainerDatabases", "AVAILABLE"),
        DATABASE_TOOLS_CONNECTION => ("/databaseToolsConnections", "ACTIVE"),
        _ => return None,
    };
    Some(
        ApiRequest::get(path)
            .with_query("compartmentId", compartment_id)
            .with_query("lifecycleState", live_state),
    )
}
