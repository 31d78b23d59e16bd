use clap::{Parser, Subcommand};
use filescan_core::Backend;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "filescan")]
#[command(about = "Track what changed in a directory tree between scans", long_about = None)]
pub struct Cli {
    /// Database file, overriding `db_path` from the configuration
    #[arg(long, global = true, env = "FILESCAN_DB")]
    pub db: Option<PathBuf>,

    /// Storage backend (sqlite or memory), overriding the configuration
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile each root with the inventory
    Scan {
        /// Roots to scan; defaults to `root_paths` from the configuration
        roots: Vec<PathBuf>,
        /// Start from an empty store
        #[arg(long)]
        create: bool,
    },
    /// List recent runs, newest first
    History {
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Show the audit events recorded by a run
    Events { run_id: i64 },
    /// Show the inventory entry for a file
    Lookup { path: PathBuf },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}
