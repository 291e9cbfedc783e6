//! Backup creation, retention and restoration.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::record::{absolute_store_path, BackupFile, BackupRecord, MANIFEST_FILE_NAME};
use crate::config::{MigrationConfig, DEFAULT_MAX_BACKUPS_TO_KEEP};
use crate::migration::MigrationError;
use crate::store::{replace_all, Replacement, StoreLocation};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Suffix of the staging files written next to the live store on restore.
const RESTORE_STAGING_SUFFIX: &str = ".restore";

/// Creates, lists, prunes and restores store backups.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    retention: Option<usize>,
}

impl BackupManager {
    /// Create a manager rooted at `root`, keeping the default number of backups.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: Some(DEFAULT_MAX_BACKUPS_TO_KEEP),
        }
    }

    /// Create a manager following a migration config, for a store at `store_path`.
    pub fn from_config(config: &MigrationConfig, store_path: &Path) -> Self {
        Self {
            root: config.resolve_backup_dir(store_path),
            retention: config.retention_limit(),
        }
    }

    /// Keep at most `max` backups per store (at least one).
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.retention = Some(max.max(1));
        self
    }

    /// Never evict backups automatically.
    pub fn without_retention(mut self) -> Self {
        self.retention = None;
        self
    }

    /// Replace the retention limit; `None` disables eviction.
    pub fn with_retention(mut self, retention: Option<usize>) -> Self {
        self.retention = retention.map(|max| max.max(1));
        self
    }

    /// Backup root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Retention limit, if eviction is enabled.
    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    /// Directory holding every bundle of `store`.
    pub fn store_dir(&self, store: &StoreLocation) -> PathBuf {
        let source = absolute_store_path(store.path());
        let digest = Sha256::digest(source.to_string_lossy().as_bytes());
        let short = &hex::encode(digest)[..12];
        self.root.join(format!("{}-{}", store.file_name(), short))
    }

    /// Snapshot the store and its companion files.
    ///
    /// Evicts the oldest bundles beyond the retention limit afterwards; an
    /// eviction failure is logged and does not fail the backup.
    pub fn create_backup(&self, store: &StoreLocation) -> Result<BackupRecord, MigrationError> {
        if !store.exists() {
            return Err(MigrationError::BackupFailed {
                reason: format!("store {store} does not exist"),
            });
        }

        let backup_failed = |context: &str, err: io::Error| MigrationError::BackupFailed {
            reason: format!("{context}: {err}"),
        };

        let store_dir = self.store_dir(store);
        fs::create_dir_all(&store_dir)
            .map_err(|e| backup_failed(&format!("cannot create {}", store_dir.display()), e))?;

        let created_at = Utc::now();
        let (id, location) = create_unique_dir(&store_dir, &created_at.format("%Y%m%dT%H%M%S%.6fZ").to_string())
            .map_err(|e| backup_failed("cannot create backup bundle", e))?;

        let mut record = BackupRecord {
            id,
            location,
            source_store_location: absolute_store_path(store.path()),
            store_file_name: store.file_name(),
            created_at,
            files: Vec::new(),
        };

        if let Err(err) = self.fill_bundle(store, &mut record) {
            if let Err(cleanup) = fs::remove_dir_all(&record.location) {
                tracing::warn!(
                    bundle = %record.location.display(),
                    error = %cleanup,
                    "failed to remove incomplete backup bundle"
                );
            }
            return Err(backup_failed("cannot copy store", err));
        }

        tracing::info!(
            store = %store,
            backup_id = %record.id,
            files = record.files.len(),
            bytes = record.total_size(),
            "backup created"
        );

        if self.retention.is_some() {
            if let Err(err) = self.prune(store) {
                tracing::warn!(store = %store, error = %err, "backup retention pass failed");
            }
        }

        Ok(record)
    }

    fn fill_bundle(&self, store: &StoreLocation, record: &mut BackupRecord) -> io::Result<()> {
        let suffixes = std::iter::once(String::new()).chain(store.companion_suffixes().iter().cloned());

        for suffix in suffixes {
            let source = store.sibling(&suffix);
            if !source.path().is_file() {
                continue;
            }
            let mut file = BackupFile {
                suffix,
                size: 0,
                sha256: String::new(),
            };
            let (size, sha256) = copy_with_digest(source.path(), &record.bundle_path(&file))?;
            file.size = size;
            file.sha256 = sha256;
            record.files.push(file);
        }

        write_manifest(record)
    }

    /// Backups of `store`, most recent first.
    pub fn list_backups(&self, store: &StoreLocation) -> Result<Vec<BackupRecord>, MigrationError> {
        let store_dir = self.store_dir(store);
        let entries = match fs::read_dir(&store_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(MigrationError::file_system(format!(
                    "cannot list backups in {}: {err}",
                    store_dir.display()
                )))
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(MigrationError::file_system)?;
            let location = entry.path();
            if !location.is_dir() {
                continue;
            }
            match read_manifest(&location) {
                Ok(Some(record)) if record.is_for(store) => records.push(record),
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(bundle = %location.display(), "skipping incomplete backup bundle");
                }
                Err(err) => {
                    tracing::warn!(bundle = %location.display(), error = %err, "unreadable backup manifest");
                }
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }

    /// Most recent backup of `store`.
    pub fn latest_backup(&self, store: &StoreLocation) -> Result<Option<BackupRecord>, MigrationError> {
        Ok(self.list_backups(store)?.into_iter().next())
    }

    /// Check every captured file against its recorded size and checksum.
    pub fn verify(&self, record: &BackupRecord) -> Result<(), MigrationError> {
        if !record.files.iter().any(BackupFile::is_primary) {
            return Err(MigrationError::restoration_failed(
                format!("backup {} has no primary store file", record.id),
                None,
            ));
        }

        for file in &record.files {
            let path = record.bundle_path(file);
            let (size, sha256) = digest_file(&path).map_err(|err| {
                MigrationError::restoration_failed(
                    format!("cannot read {}: {err}", path.display()),
                    None,
                )
            })?;
            if size != file.size || sha256 != file.sha256 {
                return Err(MigrationError::restoration_failed(
                    format!("backup {} is corrupt: {} does not match its checksum", record.id, path.display()),
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Restore the most recent backup over the live store.
    pub fn restore_latest_backup(&self, store: &StoreLocation) -> Result<bool, MigrationError> {
        let record = self
            .latest_backup(store)
            .map_err(|err| MigrationError::restoration_failed(err.to_string(), None))?
            .ok_or_else(|| {
                MigrationError::restoration_failed(format!("no backup found for {store}"), None)
            })?;

        self.restore_backup(&record, store)?;
        Ok(true)
    }

    /// Restore a specific backup over the live store.
    ///
    /// The bundle is verified and copied to staging files next to the store
    /// before anything live is touched; the staging files are then renamed
    /// over the live ones.
    pub fn restore_backup(&self, record: &BackupRecord, store: &StoreLocation) -> Result<(), MigrationError> {
        self.verify(record)?;

        let staging = store.sibling(RESTORE_STAGING_SUFFIX);
        let staged = match stage_files(record, &staging) {
            Ok(staged) => staged,
            Err(err) => {
                remove_files(record.files.iter().map(|f| staging.sibling(&f.suffix).path().to_path_buf()));
                return Err(MigrationError::restoration_failed(
                    format!("cannot stage backup {}: {err}", record.id),
                    None,
                ));
            }
        };

        swap_into_place(record, store, &staged).map_err(|err| {
            tracing::error!(store = %store, backup_id = %record.id, error = %err, "restore swap failed");
            remove_files(staged.iter().map(|(path, _)| path.clone()));
            MigrationError::restoration_failed(
                format!("cannot move backup {} into place: {err}", record.id),
                None,
            )
        })?;

        tracing::info!(store = %store, backup_id = %record.id, "backup restored");
        Ok(())
    }

    /// Apply the retention policy, returning how many bundles were removed.
    pub fn prune(&self, store: &StoreLocation) -> Result<usize, MigrationError> {
        let Some(keep) = self.retention else {
            return Ok(0);
        };

        let mut removed = 0;
        for record in self.list_backups(store)?.into_iter().skip(keep.max(1)) {
            self.delete_backup(&record)?;
            removed += 1;
        }
        if removed > 0 {
            tracing::debug!(store = %store, removed, keep, "old backups evicted");
        }
        Ok(removed)
    }

    /// Delete a bundle.
    pub fn delete_backup(&self, record: &BackupRecord) -> Result<(), MigrationError> {
        // Manifest first, so a half-deleted bundle is treated as incomplete.
        let manifest = record.manifest_path();
        if manifest.exists() {
            fs::remove_file(&manifest).map_err(MigrationError::file_system)?;
        }
        fs::remove_dir_all(&record.location).map_err(|err| {
            MigrationError::file_system(format!(
                "cannot delete backup {}: {err}",
                record.location.display()
            ))
        })?;
        tracing::debug!(backup_id = %record.id, "backup deleted");
        Ok(())
    }
}

fn create_unique_dir(parent: &Path, base: &str) -> io::Result<(String, PathBuf)> {
    let mut attempt = 0u32;
    loop {
        let id = if attempt == 0 {
            base.to_string()
        } else {
            format!("{base}-{attempt}")
        };
        let path = parent.join(&id);
        match fs::create_dir(&path) {
            Ok(()) => return Ok((id, path)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}

/// Copy `src` to `dst`, returning the size and SHA-256 of what was written.
fn copy_with_digest(src: &Path, dst: &Path) -> io::Result<(u64, String)> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut writer = BufWriter::new(File::create(dst)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        size += n as u64;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn digest_file(path: &Path) -> io::Result<(u64, String)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let size = io::copy(&mut reader, &mut hasher)?;
    Ok((size, hex::encode(hasher.finalize())))
}

fn write_manifest(record: &BackupRecord) -> io::Result<()> {
    let manifest = record.manifest_path();
    let tmp = manifest.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(record)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &manifest)
}

fn read_manifest(location: &Path) -> io::Result<Option<BackupRecord>> {
    let manifest = location.join(MANIFEST_FILE_NAME);
    let file = match File::open(&manifest) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let mut record: BackupRecord = serde_json::from_reader(BufReader::new(file))?;
    record.location = location.to_path_buf();
    Ok(Some(record))
}

/// Copy every bundle file to its staging path, returning `(staging, live suffix)` pairs.
fn stage_files(record: &BackupRecord, staging: &StoreLocation) -> io::Result<Vec<(PathBuf, String)>> {
    let mut staged = Vec::with_capacity(record.files.len());
    for file in &record.files {
        let target = staging.sibling(&file.suffix).path().to_path_buf();
        let (_, sha256) = copy_with_digest(&record.bundle_path(file), &target)?;
        if sha256 != file.sha256 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("staged copy of {} does not match its checksum", target.display()),
            ));
        }
        staged.push((target, file.suffix.clone()));
    }
    Ok(staged)
}

/// Swap the staged bundle in for the live files. Either the whole live set
/// is replaced or none of it is.
fn swap_into_place(
    record: &BackupRecord,
    store: &StoreLocation,
    staged: &[(PathBuf, String)],
) -> io::Result<()> {
    // Companions that did not exist at backup time would be replayed over the
    // restored primary file.
    let mut replacements: Vec<Replacement> = store
        .companion_suffixes()
        .iter()
        .filter(|suffix| !record.files.iter().any(|f| &f.suffix == *suffix))
        .map(|suffix| store.sibling(suffix))
        .filter(|live| live.path().exists())
        .map(|live| Replacement::remove(live.path()))
        .collect();

    // Primary last: companions must be in place before the file that uses them.
    let mut ordered: Vec<_> = staged.iter().collect();
    ordered.sort_by_key(|(_, suffix)| suffix.is_empty());
    replacements.extend(
        ordered
            .into_iter()
            .map(|(staging_path, suffix)| Replacement::install(staging_path, store.sibling(suffix).path())),
    );

    replace_all(&replacements)
}

fn remove_files(paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
    }
}
