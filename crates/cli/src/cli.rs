use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Reactive maintenance rules over an embedded database.
///
/// Runs YAML scenario scripts against a snapshot file, manages the rule
/// instances stored in it and prints collections.
#[derive(Parser, Debug)]
#[command(name = "reactive", about = "Reactive maintenance rules over an embedded database")]
pub struct CliArgs {
    /// Log at info level (RUST_LOG takes precedence when set)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Snapshot file (default: $DATA_DIR/$SNAPSHOT_FILE)
    #[arg(long, global = true, env = "REACTIVE_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Directory of rule declaration files (default: $RULES_DIR)
    #[arg(long, global = true)]
    pub rules_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a scenario script and save the resulting snapshot
    Run {
        script: PathBuf,

        /// Run every step but do not save the snapshot
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage rule instances
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Print the rows of a collection as JSON lines
    Show { collection: String },
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// List every rule instance
    List,
    /// Create every declaration from the rules directory that is not yet registered
    Provision,
    Enable { id: String },
    Disable { id: String },
    /// Recompute derived state from scratch
    Refresh { id: String },
    /// Remove an instance; derived state is kept
    Drop { id: String },
}
