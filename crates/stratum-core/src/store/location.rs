//! Store location handling.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Companion file suffixes backed up and restored alongside the primary file.
pub const DEFAULT_COMPANION_SUFFIXES: &[&str] = &["-wal", "-shm"];

/// Location of a persistent store: a primary file plus companion files
/// (write-ahead log, shared memory) that share its name with a suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreLocation {
    path: PathBuf,
    companion_suffixes: Vec<String>,
}

impl StoreLocation {
    /// Create a location with the default companion suffixes.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            companion_suffixes: DEFAULT_COMPANION_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the companion suffixes.
    pub fn with_companion_suffixes<S: Into<String>>(
        mut self,
        suffixes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.companion_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// Path of the primary store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured companion suffixes.
    pub fn companion_suffixes(&self) -> &[String] {
        &self.companion_suffixes
    }

    /// File name of the primary store file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".to_string())
    }

    /// Paths of all companion files, whether or not they exist.
    pub fn companion_paths(&self) -> Vec<PathBuf> {
        self.companion_suffixes
            .iter()
            .map(|suffix| suffixed(&self.path, suffix))
            .collect()
    }

    /// Primary file followed by every companion file that exists on disk.
    pub fn existing_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::with_capacity(1 + self.companion_suffixes.len());
        if self.path.exists() {
            files.push(self.path.clone());
        }
        files.extend(self.companion_paths().into_iter().filter(|p| p.exists()));
        files
    }

    /// Check whether the primary store file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// A sibling location whose files carry an extra suffix, e.g.
    /// `data.db` -> `data.db.staging` with companions `data.db.staging-wal`.
    pub fn sibling(&self, suffix: &str) -> StoreLocation {
        StoreLocation {
            path: suffixed(&self.path, suffix),
            companion_suffixes: self.companion_suffixes.clone(),
        }
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

pub(super) fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
