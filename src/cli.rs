use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// netops - plan orchestration for network operations assistants
#[derive(Parser)]
#[command(name = "netops")]
#[command(about = "Inspect plans, classify requests and manage persisted runs")]
#[command(version)]
pub struct Cli {
    /// Path to an engine configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the plans found in the plan directory
    Plans {
        /// Plan directory (overrides the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Validate one plan file, or every plan under a directory
    Validate {
        /// Plan file or directory
        path: PathBuf,
    },
    /// Classify a request and print the result as JSON
    Classify {
        /// Skip plan matching
        #[arg(long)]
        no_plans: bool,

        /// The request text
        #[arg(required = true, num_args = 1..)]
        utterance: Vec<String>,
    },
    /// List persisted runs
    Runs,
    /// Print a persisted run as JSON
    Inspect {
        run_id: String,
    },
    /// Undo the recorded changes of a persisted run
    Rollback {
        run_id: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
