use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "flock-cluster",
    about = "File-lock leader election for processes sharing a directory",
    version = env!("CARGO_PKG_VERSION"),
    long_about = "Runs and inspects leader elections coordinated through lock files and heartbeat records in a shared directory."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Join the election of one or more namespaces until interrupted
    Run {
        /// Configuration file (TOML); FLOCK_CLUSTER_* variables override it
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Coordination directory, overriding the configured root
        #[arg(short, long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Namespaces to elect a leader for
        #[arg(required = true)]
        namespaces: Vec<String>,
    },

    /// Show the recorded leader of a namespace
    Inspect {
        /// Coordination directory
        #[arg(short, long, value_name = "DIR", default_value = "cluster")]
        root: PathBuf,

        /// Data file extension
        #[arg(short, long, default_value = "data")]
        extension: String,

        /// Heartbeat timeout multiplier used to judge staleness
        #[arg(short, long, default_value_t = 5)]
        multiplier: i64,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Namespace to inspect
        namespace: String,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination file
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
