mod cli;
mod script;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use reactive_core::config::{load_dotenv, Config};
use reactive_rules::{DeclarationLoader, LoadStatus, RuleDeclaration, RuleEngine};
use reactive_storage::Database;

use crate::cli::{CliArgs, Command, RulesCommand};
use crate::script::{RunSummary, Script};

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let mut config = Config::from_env();
    if let Some(rules_dir) = &args.rules_dir {
        config.engine.rules_dir = rules_dir.clone();
    }
    config.log_summary();

    let snapshot = args
        .snapshot
        .clone()
        .unwrap_or_else(|| config.storage.snapshot_path());
    let mut db = Database::open(&snapshot)
        .with_context(|| format!("failed to open snapshot {}", snapshot.display()))?
        .with_max_hook_depth(config.engine.max_hook_depth);
    let engine = RuleEngine::from_config(&config.engine)
        .attach(&mut db)
        .context("failed to attach rule engine")?;

    match args.command {
        Command::Run { script, dry_run } => {
            let yaml = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            let parsed = Script::parse(&yaml)?;
            let declarations = load_declarations(&config)?;

            let target = (!dry_run).then_some(snapshot.as_path());
            let summary = run_script(&mut db, &engine, &declarations, &parsed, target)
                .with_context(|| format!("script {} failed", script.display()))?;
            println!(
                "{} steps in {} transactions, {} rows written",
                summary.steps, summary.transactions, summary.rows_written
            );
            if dry_run {
                info!("dry run, snapshot not saved");
            }
            return Ok(());
        }
        Command::Rules { action } => rules(&mut db, &engine, &config, action)?,
        Command::Show { collection } => {
            for row in db.rows(&collection)? {
                println!("{}", script::to_json(&row));
            }
            return Ok(());
        }
    }

    save_snapshot(&db, &snapshot)
}

fn save_snapshot(db: &Database, path: &Path) -> Result<()> {
    db.save_snapshot(path)
        .with_context(|| format!("failed to save snapshot {}", path.display()))?;
    info!(path = %path.display(), "snapshot saved");
    Ok(())
}

/// Run `script`, then save to `snapshot` when given. Transactions committed
/// before a failing step are saved too.
fn run_script(
    db: &mut Database,
    engine: &RuleEngine,
    declarations: &[RuleDeclaration],
    script: &Script,
    snapshot: Option<&Path>,
) -> Result<RunSummary> {
    let outcome = script::run(db, engine, declarations, script);
    if let Some(path) = snapshot {
        if let Err(e) = &outcome {
            warn!(error = %format!("{:#}", e), "script stopped, saving committed transactions");
        }
        save_snapshot(db, path)?;
    }
    outcome
}

fn rules(db: &mut Database, engine: &Arc<RuleEngine>, config: &Config, action: RulesCommand) -> Result<()> {
    match action {
        RulesCommand::List => {
            let instances = db.execute(|tx| engine.list(tx))?;
            if instances.is_empty() {
                println!("no rule instances");
            }
            for instance in instances {
                println!(
                    "{:<32} {:<16} {:<24} {}",
                    instance.id,
                    instance.kind,
                    instance.target_collection,
                    if instance.enabled { "enabled" } else { "disabled" }
                );
            }
        }
        RulesCommand::Provision => {
            let declarations = load_declarations(config)?;
            let created = db.execute(|tx| engine.provision(tx, declarations.iter().cloned()))?;
            println!("{} of {} declarations created", created, declarations.len());
        }
        RulesCommand::Enable { id } => db.execute(|tx| engine.enable(tx, &id))?,
        RulesCommand::Disable { id } => db.execute(|tx| engine.disable(tx, &id))?,
        RulesCommand::Refresh { id } => db.execute(|tx| engine.refresh(tx, &id))?,
        RulesCommand::Drop { id } => {
            let dropped = db.execute(|tx| engine.drop_rule(tx, &id))?;
            println!("dropped {} ({}); derived state kept", dropped.id, dropped.kind);
        }
    }
    Ok(())
}

/// Load every declaration file, reporting the ones that failed.
fn load_declarations(config: &Config) -> Result<Vec<RuleDeclaration>> {
    let loader = DeclarationLoader::new(config.engine.rules_dir.clone());
    for result in loader.load_all()? {
        if let LoadStatus::Failed { error } = &result.status {
            warn!(path = %result.path.display(), error = %error, "declaration skipped");
        }
    }
    Ok(loader.declarations())
}
