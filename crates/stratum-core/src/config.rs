//! Migration configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default number of backups retained per store.
pub const DEFAULT_MAX_BACKUPS_TO_KEEP: usize = 5;

/// Default backup directory name, created next to the store.
pub const DEFAULT_BACKUP_DIR_NAME: &str = ".stratum-backups";

/// Configuration for the migration manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Snapshot the store before the first migration step runs.
    pub should_create_backup: bool,

    /// Restore the snapshot when a step fails.
    pub should_restore_from_backup_on_failure: bool,

    /// Evict the oldest backups beyond `max_backups_to_keep`.
    pub should_remove_old_backups: bool,

    /// Backups kept per store when eviction is enabled.
    pub max_backups_to_keep: usize,

    /// Root directory for backup bundles. None means next to the store.
    pub backup_dir: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            should_create_backup: true,
            should_restore_from_backup_on_failure: true,
            should_remove_old_backups: true,
            max_backups_to_keep: DEFAULT_MAX_BACKUPS_TO_KEEP,
            backup_dir: None,
        }
    }
}

impl MigrationConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the pre-migration backup. Failed migrations cannot be rolled back.
    pub fn without_backup(mut self) -> Self {
        self.should_create_backup = false;
        self
    }

    /// Leave the store as-is when a step fails.
    pub fn without_restore(mut self) -> Self {
        self.should_restore_from_backup_on_failure = false;
        self
    }

    /// Keep every backup ever taken.
    pub fn without_backup_cleanup(mut self) -> Self {
        self.should_remove_old_backups = false;
        self
    }

    /// Set the number of backups kept per store.
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.max_backups_to_keep = max;
        self
    }

    /// Set the backup root directory.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Effective retention limit, or None when cleanup is disabled.
    ///
    /// Never zero: the newest backup is the one a failed migration restores.
    pub fn retention_limit(&self) -> Option<usize> {
        self.should_remove_old_backups
            .then(|| self.max_backups_to_keep.max(1))
    }

    /// Backup root for a store at `store_path`.
    pub fn resolve_backup_dir(&self, store_path: &Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => store_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_BACKUP_DIR_NAME),
        }
    }
}
