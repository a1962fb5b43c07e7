//! CLI argument definitions using clap
//!
//! Commands:
//! - hexabase init --config <path>
//! - hexabase verify --config <path>
//! - hexabase reconcile --config <path> [--apply]
//! - hexabase repair-stats --config <path> <database-id>
//! - hexabase inspect --config <path> <container>

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Hexabase maintenance tool
#[derive(Parser, Debug)]
#[command(name = "hexabase")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create the configuration, encryption key and data directory
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./hexabase.json")]
        config: PathBuf,
    },

    /// Decrypt every container and report integrity failures
    Verify {
        /// Path to configuration file
        #[arg(long, default_value = "./hexabase.json")]
        config: PathBuf,
    },

    /// Find orphan containers, dangling references and stale temp files
    Reconcile {
        /// Path to configuration file
        #[arg(long, default_value = "./hexabase.json")]
        config: PathBuf,

        /// Remove what was found instead of only reporting it
        #[arg(long)]
        apply: bool,
    },

    /// Recompute the statistics of one database from its containers
    RepairStats {
        /// Path to configuration file
        #[arg(long, default_value = "./hexabase.json")]
        config: PathBuf,

        database_id: String,
    },

    /// Print the decrypted contents of a container
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./hexabase.json")]
        config: PathBuf,

        container: String,
    },
}

impl Command {
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Init { config }
            | Command::Verify { config }
            | Command::Reconcile { config, .. }
            | Command::RepairStats { config, .. }
            | Command::Inspect { config, .. } => config,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
