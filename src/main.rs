//! netops - Main entry point
//!
//! Thin command-line wrapper over the library: plan inspection, request
//! classification and run maintenance. Executing plans needs the device API
//! handlers of an embedding application, so the binary never runs steps.

mod cli;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use netops::config::EngineConfig;
use netops::engine::{rollback, SessionContext};
use netops::plan::{loader, PlanCatalog};
use netops::safety::BackupSafetyGuard;
use netops::store::{FileRunStore, RunStateStore};
use netops::IntentClassifier;

use crate::cli::{Cli, Commands};

/// Log to stderr so stdout stays machine-readable
fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_args();
    debug!("CLI arguments parsed");

    let config = EngineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Plans { dir } => {
            let dir = dir.unwrap_or_else(|| config.plans_dir.clone());
            list_plans(&dir);
        }
        Commands::Validate { path } => {
            if !validate_plans(&path) {
                std::process::exit(1);
            }
        }
        Commands::Classify {
            no_plans,
            utterance,
        } => {
            let use_plans = config.use_plan_matching && !no_plans;
            let mut classifier =
                IntentClassifier::new().with_max_utterance_len(config.max_utterance_len);
            if use_plans {
                let catalog = PlanCatalog::load(&[&config.plans_dir]);
                classifier = classifier.with_catalog(Arc::new(catalog));
            }

            let result = classifier.classify(&utterance.join(" "), use_plans).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Runs => {
            let store = run_store(&config);
            let runs = store.list().context("Failed to list runs")?;
            if runs.is_empty() {
                println!("No runs in {:?}", store.root());
            }
            for run in runs {
                println!(
                    "{}  {:<24} {:<12} step {:<3} changes {}",
                    run.task_id, run.task_name, run.status, run.current_step, run.changes
                );
            }
        }
        Commands::Inspect { run_id } => {
            let state = run_store(&config)
                .load(&run_id)
                .with_context(|| format!("Failed to load run {}", run_id))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::Rollback { run_id } => {
            let store = run_store(&config);
            let mut state = store
                .load(&run_id)
                .with_context(|| format!("Failed to load run {}", run_id))?;

            let guard = BackupSafetyGuard::new(config.backup_root());
            let mut session = SessionContext::new("cli");
            session.profile = config.active_profile.clone();

            let report = rollback::rollback(&mut state, &guard, &session).await?;
            store
                .save(&state)
                .with_context(|| format!("Failed to save run {}", run_id))?;

            if !report.is_clean() {
                error!(
                    "{} of {} change(s) could not be undone",
                    report.failed(),
                    report.entries.len()
                );
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn run_store(config: &EngineConfig) -> FileRunStore {
    FileRunStore::for_profile(&config.state_dir, config.active_profile.as_deref())
}

fn list_plans(dir: &Path) {
    let catalog = PlanCatalog::load(&[dir]);
    if catalog.is_empty() {
        println!("No plans found in {:?}", dir);
        return;
    }

    for plan in catalog.iter() {
        println!(
            "{:<28} {:<18} {:<6} {} step(s)  triggers: {}",
            plan.name,
            plan.capability,
            plan.risk_level,
            plan.steps.len(),
            plan.triggers.join(", ")
        );
    }
}

/// Print one line per plan file; true when every file is valid
fn validate_plans(path: &Path) -> bool {
    if path.is_file() {
        return match loader::load(path) {
            Ok(plan) => {
                println!("✓ {:?}: plan '{}' is valid", path, plan.name);
                true
            }
            Err(e) => {
                eprintln!("✗ {:?}: {}", path, e);
                false
            }
        };
    }

    let report = loader::scan(&[path]);
    let mut ok = report.failures.is_empty();
    let mut seen = HashSet::new();

    for plan in &report.plans {
        let origin = plan.origin.as_deref().unwrap_or(path);
        if seen.insert(plan.name.as_str()) {
            println!("✓ {:?}: plan '{}' is valid", origin, plan.name);
        } else {
            eprintln!("✗ {:?}: plan name '{}' is already defined", origin, plan.name);
            ok = false;
        }
    }
    for (file, e) in &report.failures {
        eprintln!("✗ {:?}: {}", file, e);
    }

    info!(
        "Validated {} file(s), {} invalid",
        report.plans.len() + report.failures.len(),
        report.failures.len()
    );
    ok
}
