//! CLI module for hexabase
//!
//! Operator commands over a data directory:
//! - init: create config, key and data directory
//! - verify: decrypt every container
//! - reconcile: report or repair cross-container drift
//! - repair-stats: recompute one database's counters
//! - inspect: dump a decrypted container

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{init, inspect, reconcile, repair_stats, run, run_command, verify, VerifyFailure, VerifyReport};
pub use errors::{CliError, CliErrorCode, CliResult};
