//! CLI command implementations
//!
//! Each command loads the configuration, installs logging and returns a
//! serializable result that `run_command` prints as JSON on stdout.
//! Maintenance commands act as [`Actor::system`].

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::Actor;
use crate::cipher::KeyManager;
use crate::config::HexabaseConfig;
use crate::container::Storage;
use crate::errors::HexaError;
use crate::hierarchy::{DatabaseStatistics, ReconcileMode, ReconcileReport};
use crate::observability::init_logging;
use crate::Hexabase;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// A container that failed to open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyFailure {
    pub container: String,
    pub reason: String,
}

/// Result of `verify`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub failures: Vec<VerifyFailure>,
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run a command and print its result
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => write_json(&init(&config)?),
        Command::Verify { config } => {
            let report = verify(&config)?;
            write_json(&report)?;
            if report.failures.is_empty() {
                Ok(())
            } else {
                Err(CliError::integrity_failed(format!(
                    "{} of {} container(s) failed verification",
                    report.failures.len(),
                    report.checked
                )))
            }
        }
        Command::Reconcile { config, apply } => write_json(&reconcile(&config, apply)?),
        Command::RepairStats {
            config,
            database_id,
        } => write_json(&repair_stats(&config, &database_id)?),
        Command::Inspect { config, container } => write_json(&inspect(&config, &container)?),
    }
}

/// Create the config file (if missing), the key and the data directory
pub fn init(config_path: &Path) -> CliResult<Value> {
    let config = HexabaseConfig::load_or_default(config_path)?;
    init_logging(&config.logging);

    let hexabase = Hexabase::open(&config)?;
    Ok(json!({
        "initialized": true,
        "dataDir": hexabase.storage().data_dir(),
        "keyFingerprint": hexabase.storage().keys().fingerprint(),
    }))
}

/// Decrypt every container in the data directory
pub fn verify(config_path: &Path) -> CliResult<VerifyReport> {
    let storage = open_storage(config_path)?;

    let mut report = VerifyReport::default();
    for name in storage.list_containers()? {
        report.checked += 1;
        match storage.container(&name)?.load_all() {
            Ok(_) => {}
            Err(HexaError::IntegrityFailure { reason, .. }) => {
                report.failures.push(VerifyFailure {
                    container: name,
                    reason,
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(report)
}

pub fn reconcile(config_path: &Path, apply: bool) -> CliResult<ReconcileReport> {
    let hexabase = open(config_path)?;
    let mode = if apply {
        ReconcileMode::Apply
    } else {
        ReconcileMode::DryRun
    };
    Ok(hexabase.hierarchy().reconcile(&Actor::system(), mode)?)
}

pub fn repair_stats(config_path: &Path, database_id: &str) -> CliResult<DatabaseStatistics> {
    let hexabase = open(config_path)?;
    Ok(hexabase
        .hierarchy()
        .recompute_statistics(&Actor::system(), database_id)?)
}

/// Decrypted contents of one container
pub fn inspect(config_path: &Path, container: &str) -> CliResult<Value> {
    let storage = open_storage(config_path)?;
    let store = storage.container(container)?;
    if !store.exists() {
        return Err(CliError::command_failed(format!("container '{}' does not exist", container)));
    }
    Ok(Value::Object(store.load_all()?))
}

fn load_config(config_path: &Path) -> CliResult<HexabaseConfig> {
    if !config_path.exists() {
        return Err(CliError::config_error(format!(
            "{} not found. Run 'hexabase init' first.",
            config_path.display()
        )));
    }
    let config = HexabaseConfig::load(config_path)?;
    init_logging(&config.logging);
    Ok(config)
}

fn open(config_path: &Path) -> CliResult<Hexabase> {
    let config = load_config(config_path)?;
    require_key(&config)?;
    Ok(Hexabase::open(&config)?)
}

/// Storage only, for commands that never touch users or sessions
fn open_storage(config_path: &Path) -> CliResult<Storage> {
    let config = load_config(config_path)?;
    require_key(&config)?;
    let keys = Arc::new(KeyManager::load_or_generate(&config.storage.key_path).map_err(HexaError::from)?);
    Ok(Storage::open(&config.storage.data_dir, keys)?)
}

/// Maintenance commands never mint a new key over existing data
fn require_key(config: &HexabaseConfig) -> CliResult<()> {
    if config.storage.key_path.exists() {
        Ok(())
    } else {
        Err(CliError::config_error(format!(
            "encryption key {} not found. Run 'hexabase init' first.",
            config.storage.key_path.display()
        )))
    }
}

fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
