mod config;

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use log::{info, warn};

use stratus_core::differ::{create_plan, destroy_plan};
use stratus_core::effect::Effect;
use stratus_core::plan::Plan;
use stratus_core::provider::{Provider, ProviderResult};
use stratus_core::resource::{ResourceId, State, Value};
use stratus_core::{ActionType, WorkRequestId};
use stratus_provider_oci::resources::find_resource_type;
use stratus_provider_oci::{OciProvider, Sweeper};
use stratus_state::{LockInfo, LockOperation, ResourceState, StateBackend, StateFile, create_backend};

use config::StratusConfig;

#[derive(Parser)]
#[command(name = "stratus")]
#[command(about = "Reconcile database resources driven by work requests", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "stratus.json")]
    config: PathBuf,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show execution plan without applying changes
    Plan,
    /// Apply changes to reach the desired state
    Apply,
    /// Destroy every resource recorded in state
    Destroy {
        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Wait for a work request and print the identifier it produced
    Wait {
        /// Work request id
        work_request_id: String,

        /// Entity type to look for among the affected resources
        #[arg(long)]
        entity_type: String,

        /// Expected action (CREATED, UPDATED, DELETED, ...)
        #[arg(long)]
        action: String,

        #[arg(long, default_value_t = 1200)]
        timeout_secs: u64,
    },
    /// Terminate leftover resources in a compartment
    Sweep {
        #[arg(long)]
        compartment: String,

        /// Resource kind to leave alone (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Identifier to leave alone (repeatable)
        #[arg(long)]
        protect: Vec<String>,
    },
    /// Remove a stale state lock
    ForceUnlock {
        /// Lock id reported by the failed command
        lock_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Plan => run_plan(&cli.config).await,
        Commands::Apply => run_apply(&cli.config).await,
        Commands::Destroy { auto_approve } => run_destroy(&cli.config, auto_approve).await,
        Commands::Wait {
            work_request_id,
            entity_type,
            action,
            timeout_secs,
        } => run_wait(&cli.config, &work_request_id, &entity_type, &action, timeout_secs).await,
        Commands::Sweep {
            compartment,
            exclude,
            protect,
        } => run_sweep(&cli.config, &compartment, exclude, protect).await,
        Commands::ForceUnlock { lock_id } => run_force_unlock(&cli.config, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn build_provider(config: &StratusConfig) -> Result<OciProvider, String> {
    OciProvider::from_config(&config.provider).map_err(|e| format!("Provider configuration: {}", e))
}

async fn open_backend(config: &StratusConfig) -> Result<Box<dyn StateBackend>, String> {
    let backend = create_backend(&config.backend).map_err(|e| e.to_string())?;
    backend.init().await.map_err(|e| e.to_string())?;
    Ok(backend)
}

async fn release(backend: &dyn StateBackend, lock: &LockInfo) {
    if let Err(e) = backend.release_lock(lock).await {
        eprintln!(
            "{} failed to release lock {}: {} (run `stratus force-unlock {}`)",
            "Warning:".yellow().bold(),
            lock.id,
            e,
            lock.id
        );
    }
}

// =============================================================================
// plan / apply
// =============================================================================

async fn run_plan(config_path: &PathBuf) -> Result<(), String> {
    let config = StratusConfig::load(config_path)?;
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    refresh_state(&provider, &mut state).await?;

    let plan = plan_for(&config, &provider, &state);
    print_plan(&plan);
    Ok(())
}

async fn run_apply(config_path: &PathBuf) -> Result<(), String> {
    let config = StratusConfig::load(config_path)?;
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    let lock = backend
        .acquire_lock(LockOperation::Apply)
        .await
        .map_err(|e| e.to_string())?;
    let result = apply_locked(&config, &provider, backend.as_ref()).await;
    release(backend.as_ref(), &lock).await;
    result
}

async fn apply_locked(
    config: &StratusConfig,
    provider: &dyn Provider,
    backend: &dyn StateBackend,
) -> Result<(), String> {
    let mut state = backend
        .read_state()
        .await
        .map_err(|e| e.to_string())?
        .unwrap_or_default();
    refresh_state(provider, &mut state).await?;
    config.sync_timeouts(&mut state);

    let plan = plan_for(config, provider, &state);
    if plan.is_empty() {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let protected: HashSet<ResourceId> = config
        .resources
        .iter()
        .filter(|d| d.protected)
        .map(|d| d.id())
        .collect();
    let outcome = execute_plan(&plan, provider, backend, &mut state, &protected).await?;

    println!();
    if outcome.failed == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", outcome.succeeded)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            outcome.succeeded, outcome.failed
        ))
    }
}

fn plan_for(config: &StratusConfig, provider: &dyn Provider, state: &StateFile) -> Plan {
    create_plan(
        &config.desired_resources(),
        &state.current_states(),
        &state.order(),
        &provider.resource_types(),
    )
}

/// Drop stored resources whose entity no longer exists
async fn refresh_state(provider: &dyn Provider, state: &mut StateFile) -> Result<(), String> {
    let mut gone = Vec::new();
    for stored in &state.resources {
        let id = stored.resource_id();
        let current = provider
            .read(&id, stored.identifier.as_deref())
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?;
        if !current.exists {
            warn!("{} no longer exists and will be recreated", id);
            gone.push(id);
        }
    }
    for id in gone {
        state.remove_resource(&id);
    }
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ExecutionOutcome {
    succeeded: usize,
    failed: usize,
}

/// Run every effect in order, writing state after each success.
///
/// A failed effect is reported and the remaining effects still run. A state
/// write failure aborts, since later effects could not be recorded either.
async fn execute_plan(
    plan: &Plan,
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    state: &mut StateFile,
    protected: &HashSet<ResourceId>,
) -> Result<ExecutionOutcome, String> {
    let mut outcome = ExecutionOutcome::default();

    for effect in plan.effects() {
        let result: ProviderResult<Option<State>> = match effect {
            Effect::Create(resource) => provider.create(resource).await.map(Some),
            Effect::Update {
                id,
                identifier,
                from,
                to,
            } => provider
                .update(id, identifier, from, to)
                .await
                .map(|s| match s.identifier {
                    Some(_) => Some(s),
                    None => Some(s.with_identifier(identifier.clone())),
                }),
            Effect::Delete {
                id,
                identifier,
                from,
            } => provider
                .delete(id, identifier, from)
                .await
                .map(|()| None),
        };

        match result {
            Ok(new_state) => {
                println!("  {} {}", "✓".green(), format_effect(effect));
                outcome.succeeded += 1;

                let id = effect.resource_id();
                match new_state {
                    Some(new_state) => {
                        let sensitive = find_resource_type(&id.resource_type)
                            .map(|t| t.sensitive_attributes())
                            .unwrap_or(&[]);
                        state.upsert_resource(
                            ResourceState::from_state(&new_state, provider.name(), sensitive)
                                .with_protected(protected.contains(id)),
                        );
                    }
                    None => {
                        state.remove_resource(id);
                    }
                }
                state.increment_serial();
                backend
                    .write_state(state)
                    .await
                    .map_err(|e| format!("Failed to write state after {}: {}", id, e))?;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(effect), e);
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

// =============================================================================
// destroy
// =============================================================================

async fn run_destroy(config_path: &PathBuf, auto_approve: bool) -> Result<(), String> {
    let config = StratusConfig::load(config_path)?;
    let provider = build_provider(&config)?;
    let backend = open_backend(&config).await?;

    let lock = backend
        .acquire_lock(LockOperation::Destroy)
        .await
        .map_err(|e| e.to_string())?;
    let result = destroy_locked(&config, &provider, backend.as_ref(), auto_approve).await;
    release(backend.as_ref(), &lock).await;
    result
}

async fn destroy_locked(
    config: &StratusConfig,
    provider: &dyn Provider,
    backend: &dyn StateBackend,
    auto_approve: bool,
) -> Result<(), String> {
    let Some(mut state) = backend.read_state().await.map_err(|e| e.to_string())? else {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    };
    config.sync_timeouts(&mut state);

    let plan = protected_filtered(destroy_plan(&state.current_states(), &state.order()), &state);
    if plan.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for effect in plan.effects() {
        println!("  {} {}", "-".red().bold(), effect.resource_id());
    }
    println!();
    println!("Plan: {} to destroy.", plan.len().to_string().red());
    println!();

    if !auto_approve && !confirm("Do you really want to destroy all resources?")? {
        println!();
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    println!("{}", "Destroying resources...".red().bold());
    println!();

    let outcome = execute_plan(&plan, provider, backend, &mut state, &HashSet::new()).await?;

    println!();
    if outcome.failed == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", outcome.succeeded)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            outcome.succeeded, outcome.failed
        ))
    }
}

/// Remove deletes of resources marked protected in state
fn protected_filtered(plan: Plan, state: &StateFile) -> Plan {
    let mut filtered = Plan::new();
    for effect in plan.effects() {
        let protected = state
            .find_resource(effect.resource_id())
            .is_some_and(|r| r.protected);
        if protected {
            println!(
                "{} {} is protected",
                "Skipping".yellow(),
                effect.resource_id()
            );
        } else {
            filtered.add(effect.clone());
        }
    }
    filtered
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

// =============================================================================
// wait / sweep / force-unlock
// =============================================================================

async fn run_wait(
    config_path: &PathBuf,
    work_request_id: &str,
    entity_type: &str,
    action: &str,
    timeout_secs: u64,
) -> Result<(), String> {
    let config = StratusConfig::load_or_default(config_path)?;
    let provider = build_provider(&config)?;
    let action = parse_action(action)?;

    println!(
        "{}",
        format!("Waiting for work request {}...", work_request_id).cyan()
    );
    let identifier = provider
        .wait_for(
            &WorkRequestId::new(work_request_id),
            entity_type,
            action,
            Duration::from_secs(timeout_secs),
        )
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", identifier);
    Ok(())
}

fn parse_action(action: &str) -> Result<ActionType, String> {
    let value = serde_json::Value::String(action.trim().to_ascii_uppercase());
    match serde_json::from_value(value) {
        Ok(ActionType::Unknown) | Err(_) => Err(format!(
            "Unknown action type: {} (expected CREATED, UPDATED, DELETED, IN_PROGRESS or RELATED)",
            action
        )),
        Ok(action) => Ok(action),
    }
}

async fn run_sweep(
    config_path: &PathBuf,
    compartment: &str,
    exclude: Vec<String>,
    protect: Vec<String>,
) -> Result<(), String> {
    let config = StratusConfig::load_or_default(config_path)?;
    let provider = build_provider(&config)?;

    let mut sweeper_config = config.sweeper.clone();
    sweeper_config.exclude.extend(exclude);
    sweeper_config.protected_ids.extend(protect);

    // Resources marked protected in state survive the sweep too
    let backend = open_backend(&config).await?;
    if let Some(state) = backend.read_state().await.map_err(|e| e.to_string())? {
        sweeper_config
            .protected_ids
            .extend(state.protected_identifiers());
    }

    info!(
        "Sweeping {} with {} protected ids",
        compartment,
        sweeper_config.protected_ids.len()
    );
    println!("{}", format!("Sweeping {}...", compartment).cyan().bold());

    let report = Sweeper::new(&provider, sweeper_config)
        .sweep(compartment)
        .await
        .map_err(|e| e.to_string())?;

    for swept in &report.deleted {
        println!("  {} {} {}", "✓".green(), swept.kind, swept.id);
    }
    for kept in &report.protected {
        println!("  {} {} {} (protected)", "•".normal(), kept.kind, kept.id);
    }
    for failure in &report.failed {
        println!(
            "  {} {} {} - {}",
            "✗".red(),
            failure.kind,
            failure.id.as_deref().unwrap_or("(list)"),
            failure.message
        );
    }

    println!();
    if report.is_clean() {
        println!(
            "{}",
            format!("Sweep complete! {} resources deleted.", report.deleted.len())
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Sweep incomplete. {} deleted, {} failed.",
            report.deleted.len(),
            report.failed.len()
        ))
    }
}

async fn run_force_unlock(config_path: &PathBuf, lock_id: &str) -> Result<(), String> {
    let config = StratusConfig::load_or_default(config_path)?;
    let backend = open_backend(&config).await?;
    backend
        .force_unlock(lock_id)
        .await
        .map_err(|e| e.to_string())?;
    println!("{}", format!("Lock {} removed.", lock_id).green());
    Ok(())
}

// =============================================================================
// Output
// =============================================================================

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Execution Plan:".cyan().bold());
    println!();

    for effect in plan.effects() {
        let symbol = match effect {
            Effect::Create(_) => "+".green().bold(),
            Effect::Update { .. } => "~".yellow().bold(),
            Effect::Delete { .. } => "-".red().bold(),
        };
        println!("  {} {}", symbol, effect.resource_id());

        if let Effect::Update { from, to, .. } = effect {
            for line in changed_lines(from, to) {
                println!("      {}", line);
            }
        }
    }

    println!();
    println!("{}", plan.summary());
}

/// `key: old → new` for each declared attribute that differs from state
fn changed_lines(from: &State, to: &stratus_core::resource::Resource) -> Vec<String> {
    let sensitive = find_resource_type(&to.id.resource_type)
        .map(|t| t.sensitive_attributes())
        .unwrap_or(&[]);

    let mut keys: Vec<&String> = to
        .attributes
        .keys()
        .filter(|k| !k.starts_with('_'))
        .filter(|k| from.attributes.get(*k) != to.attributes.get(*k))
        .collect();
    keys.sort();

    keys.into_iter()
        .map(|key| {
            if sensitive.contains(&key.as_str()) {
                return format!("{}: (sensitive)", key);
            }
            let old = from
                .attributes
                .get(key)
                .map(format_value)
                .unwrap_or_else(|| "(none)".to_string());
            let new = to.attributes.get(key).map(format_value).unwrap_or_default();
            format!("{}: {} → {}", key, old, new)
        })
        .collect()
}

fn format_effect(effect: &Effect) -> String {
    let id = effect.resource_id();
    match effect {
        Effect::Create(_) => format!("Create {}", id),
        Effect::Update { .. } => format!("Update {}", id),
        Effect::Delete { .. } => format!("Delete {}", id),
    }
}

fn format_value(value: &Value) -> String {
    value.to_json().to_string()
}
