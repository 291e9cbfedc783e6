//! Subcommand implementations.
//!
//! Every command works on a [`JsonDocumentStore`] file. Migrations are not
//! run from here: mappers are application code, so the CLI only inspects,
//! plans, backs up and restores.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stratum_core::{
    BackupManager, JsonDocumentStore, MigrationConfig, MigrationPlanner, StoreLocation,
    VersionCatalog, VersionIdentifier,
};

use crate::error::CliError;
use crate::formatter::Formatter;
use crate::{Args, Command};

/// Name of the config file looked up in the user config directory.
const CONFIG_FILE_NAME: &str = "config.json";

/// Migration status of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Store path.
    pub store: String,
    /// Version stamped on the store.
    pub current_version: VersionIdentifier,
    /// Version the store would be migrated to.
    pub destination_version: VersionIdentifier,
    /// Whether the two differ.
    pub requires_migration: bool,
    /// Number of backups of this store.
    pub backup_count: usize,
    /// Most recent backup ID.
    pub latest_backup: Option<String>,
}

/// Default config file path (`<config dir>/stratum/config.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("stratum").join(CONFIG_FILE_NAME))
}

/// Load the migration config, then apply command-line overrides.
///
/// An explicit `--config` must exist; the default path is optional.
pub fn load_config(args: &Args) -> Result<MigrationConfig, CliError> {
    let path = match &args.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().filter(|path| path.is_file()),
    };

    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
            let config: MigrationConfig = serde_json::from_str(&content)
                .map_err(|e| CliError::Config(format!("invalid {}: {e}", path.display())))?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            config
        }
        None => MigrationConfig::default(),
    };

    if let Some(dir) = &args.backup_dir {
        config = config.with_backup_dir(dir);
    }
    if let Some(max) = args.max_backups {
        config = config.with_max_backups(max);
    }
    Ok(config)
}

/// Run a command and return its formatted output.
pub fn execute(args: &Args, formatter: &dyn Formatter) -> Result<String, CliError> {
    let config = load_config(args)?;
    let store = StoreLocation::new(&args.store);
    let backups = BackupManager::from_config(&config, store.path());

    match &args.command {
        Command::Status => {
            let report = status(args, &store, &backups)?;
            Ok(formatter.format_status(&report))
        }
        Command::Plan => {
            let plan = planner(args)?.create_migration_plan(&store)?;
            Ok(formatter.format_plan(&plan))
        }
        Command::Backup => {
            let record = backups.create_backup(&store)?;
            Ok(formatter.format_message(&format!(
                "created backup {} ({} file(s)) in {}",
                record.id,
                record.files.len(),
                record.location.display()
            )))
        }
        Command::Backups => {
            let records = backups.list_backups(&store)?;
            Ok(formatter.format_backups(&records))
        }
        Command::Restore { id } => {
            let record = find_backup(&backups, &store, id.as_deref())?;
            backups.restore_backup(&record, &store)?;
            Ok(formatter.format_message(&format!("restored {} from backup {}", store, record.id)))
        }
        Command::Prune => {
            let removed = backups.prune(&store)?;
            Ok(formatter.format_message(&format!("removed {removed} backup(s)")))
        }
    }
}

fn status(args: &Args, store: &StoreLocation, backups: &BackupManager) -> Result<StatusReport, CliError> {
    let planner = planner(args)?;
    let current_version = planner.current_version(store)?;
    let destination_version = planner.destination_version()?;
    let records = backups.list_backups(store)?;

    Ok(StatusReport {
        store: store.to_string(),
        current_version,
        destination_version,
        requires_migration: current_version != destination_version,
        backup_count: records.len(),
        latest_backup: records.first().map(|record| record.id.clone()),
    })
}

fn planner(args: &Args) -> Result<MigrationPlanner, CliError> {
    if args.versions.is_empty() {
        return Err(CliError::Usage(
            "--versions is required to resolve the store version".to_string(),
        ));
    }

    let catalog = VersionCatalog::from_tags(&args.versions)?;
    let mut planner = MigrationPlanner::new(catalog, Arc::new(JsonDocumentStore::new()));
    if let Some(target) = &args.target {
        planner = planner.with_destination(VersionIdentifier::parse(target)?);
    }
    Ok(planner)
}

fn find_backup(
    backups: &BackupManager,
    store: &StoreLocation,
    id: Option<&str>,
) -> Result<stratum_core::BackupRecord, CliError> {
    let mut records = backups.list_backups(store)?;
    let found = match id {
        Some(id) => records
            .iter()
            .position(|record| record.id == id)
            .map(|index| records.swap_remove(index)),
        None => (!records.is_empty()).then(|| records.swap_remove(0)),
    };

    found.ok_or_else(|| match id {
        Some(id) => CliError::Usage(format!("no backup {id} for {store}")),
        None => CliError::Usage(format!("no backups for {store}")),
    })
}

/// Resolve the backup directory shown to users.
pub fn backup_root(args: &Args) -> Result<PathBuf, CliError> {
    Ok(load_config(args)?.resolve_backup_dir(Path::new(&args.store)))
}
