//! Backup manifest types.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreLocation;

/// Name of the manifest file inside each bundle.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// One file captured in a backup bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Suffix appended to the store path: empty for the primary file,
    /// `-wal`/`-shm` for companions.
    pub suffix: String,
    /// File size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the contents.
    pub sha256: String,
}

impl BackupFile {
    /// Check if this is the primary store file.
    pub fn is_primary(&self) -> bool {
        self.suffix.is_empty()
    }

    /// Name of the copy inside the bundle.
    pub fn bundle_name(&self, store_file_name: &str) -> String {
        format!("{store_file_name}{}", self.suffix)
    }
}

/// A point-in-time copy of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Bundle identifier (the bundle directory name).
    pub id: String,
    /// Bundle directory. Filled in from where the manifest was read.
    #[serde(skip)]
    pub location: PathBuf,
    /// Absolute path of the store this backup was taken from.
    pub source_store_location: PathBuf,
    /// File name of the primary store file.
    pub store_file_name: String,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Captured files, primary first.
    pub files: Vec<BackupFile>,
}

impl BackupRecord {
    /// Total size of the captured files.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Path of a captured file inside the bundle.
    pub fn bundle_path(&self, file: &BackupFile) -> PathBuf {
        self.location.join(file.bundle_name(&self.store_file_name))
    }

    /// Path of the manifest inside the bundle.
    pub fn manifest_path(&self) -> PathBuf {
        self.location.join(MANIFEST_FILE_NAME)
    }

    /// Check if this backup was taken from `store`.
    pub fn is_for(&self, store: &StoreLocation) -> bool {
        self.source_store_location == absolute_store_path(store.path())
    }
}

/// Absolute form of a store path, without touching the file system.
pub(crate) fn absolute_store_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_round_trip_skips_location() {
        let record = BackupRecord {
            id: "20240101T000000.000000Z".to_string(),
            location: PathBuf::from("/backups/app.db-abc/20240101T000000.000000Z"),
            source_store_location: PathBuf::from("/data/app.db"),
            store_file_name: "app.db".to_string(),
            created_at: Utc::now(),
            files: vec![
                BackupFile { suffix: String::new(), size: 10, sha256: "aa".into() },
                BackupFile { suffix: "-wal".into(), size: 5, sha256: "bb".into() },
            ],
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"location\""));
        let back: BackupRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.location, PathBuf::new());
        assert_eq!(back.files, record.files);
        assert_eq!(back.total_size(), 15);
        assert!(back.files[0].is_primary());
        assert_eq!(back.files[1].bundle_name("app.db"), "app.db-wal");
    }

    #[test]
    fn test_is_for() {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreLocation::new(dir.path().join("app.db"));
        let record = BackupRecord {
            id: "x".to_string(),
            location: PathBuf::new(),
            source_store_location: absolute_store_path(store.path()),
            store_file_name: "app.db".to_string(),
            created_at: Utc::now(),
            files: Vec::new(),
        };

        assert!(record.is_for(&store));
        assert!(!record.is_for(&StoreLocation::new(dir.path().join("other.db"))));
    }
}
