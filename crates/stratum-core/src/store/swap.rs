//! Replacing a store's file set as one unit.
//!
//! Each live file is parked under a `.prev` sibling before its replacement
//! is renamed in. If any rename fails, every file moved in so far is taken
//! out again and the parked files are put back, so the live set is either
//! entirely the old one or entirely the new one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::location::suffixed;

/// Suffix a live file is parked under while its replacement moves in.
pub(crate) const PARKED_SUFFIX: &str = ".prev";

/// One live file and what takes its place.
#[derive(Debug, Clone)]
pub(crate) struct Replacement {
    live: PathBuf,
    /// None removes the live file.
    staged: Option<PathBuf>,
}

impl Replacement {
    /// Move `staged` over `live`.
    pub(crate) fn install(staged: impl Into<PathBuf>, live: impl Into<PathBuf>) -> Self {
        Self {
            live: live.into(),
            staged: Some(staged.into()),
        }
    }

    /// Remove `live`.
    pub(crate) fn remove(live: impl Into<PathBuf>) -> Self {
        Self {
            live: live.into(),
            staged: None,
        }
    }
}

struct Applied<'a> {
    live: &'a Path,
    parked: Option<PathBuf>,
    installed: bool,
}

/// Apply every replacement in order, all or nothing.
///
/// On error the live files are back in their original state (rollback
/// failures are logged) and the error of the failed rename is returned.
pub(crate) fn replace_all(replacements: &[Replacement]) -> io::Result<()> {
    let mut applied = Vec::with_capacity(replacements.len());

    for replacement in replacements {
        let mut entry = Applied {
            live: &replacement.live,
            parked: None,
            installed: false,
        };
        let result = apply(replacement, &mut entry);
        applied.push(entry);

        if let Err(err) = result {
            tracing::warn!(
                path = %replacement.live.display(),
                error = %err,
                "file swap failed; rolling back"
            );
            roll_back(&applied);
            return Err(err);
        }
    }

    for parked in applied.iter().filter_map(|entry| entry.parked.as_ref()) {
        if let Err(err) = fs::remove_file(parked) {
            tracing::warn!(path = %parked.display(), error = %err, "failed to remove parked file");
        }
    }
    Ok(())
}

fn apply(replacement: &Replacement, entry: &mut Applied<'_>) -> io::Result<()> {
    if fs::symlink_metadata(&replacement.live).is_ok() {
        let parked = suffixed(&replacement.live, PARKED_SUFFIX);
        fs::rename(&replacement.live, &parked)?;
        entry.parked = Some(parked);
    }
    if let Some(staged) = &replacement.staged {
        fs::rename(staged, &replacement.live)?;
        entry.installed = true;
    }
    Ok(())
}

fn roll_back(applied: &[Applied<'_>]) {
    for entry in applied.iter().rev() {
        if entry.installed {
            if let Err(err) = fs::remove_file(entry.live) {
                tracing::error!(path = %entry.live.display(), error = %err, "rollback could not remove new file");
            }
        }
        if let Some(parked) = &entry.parked {
            if let Err(err) = fs::rename(parked, entry.live) {
                tracing::error!(
                    path = %entry.live.display(),
                    parked = %parked.display(),
                    error = %err,
                    "rollback could not restore parked file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestContext {
        dir: tempfile::TempDir,
    }

    impl TestContext {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn file(&self, name: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, contents).unwrap();
            path
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.path(name)).unwrap()
        }

        fn names(&self) -> Vec<String> {
            let mut names: Vec<_> = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            names
        }
    }

    #[test]
    fn test_replaces_and_removes() {
        let ctx = TestContext::new();
        ctx.file("db", "v1");
        ctx.file("db-wal", "wal-1");
        ctx.file("db-shm", "shm-1");
        let staged_db = ctx.file("db.new", "v2");
        let staged_wal = ctx.file("db.new-wal", "wal-2");

        replace_all(&[
            Replacement::install(staged_wal, ctx.path("db-wal")),
            Replacement::remove(ctx.path("db-shm")),
            Replacement::install(staged_db, ctx.path("db")),
        ])
        .unwrap();

        assert_eq!(ctx.read("db"), "v2");
        assert_eq!(ctx.read("db-wal"), "wal-2");
        assert_eq!(ctx.names(), vec!["db", "db-wal"]);
    }

    #[test]
    fn test_failed_primary_rename_rolls_back_companions() {
        let ctx = TestContext::new();
        ctx.file("db", "v1");
        ctx.file("db-wal", "wal-1");
        let staged_wal = ctx.file("db.new-wal", "wal-2");

        let err = replace_all(&[
            Replacement::install(staged_wal, ctx.path("db-wal")),
            Replacement::install(ctx.path("db.new"), ctx.path("db")),
        ])
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert_eq!(ctx.read("db"), "v1");
        assert_eq!(ctx.read("db-wal"), "wal-1");
        assert_eq!(ctx.names(), vec!["db", "db-wal"]);
    }

    #[test]
    fn test_removed_file_comes_back_on_failure() {
        let ctx = TestContext::new();
        ctx.file("db", "v1");
        ctx.file("db-shm", "shm-1");
        fs::create_dir(ctx.path("db.prev")).unwrap();
        fs::write(ctx.path("db.prev").join("keep"), "x").unwrap();
        let staged_db = ctx.file("db.new", "v2");

        assert!(replace_all(&[
            Replacement::remove(ctx.path("db-shm")),
            Replacement::install(staged_db, ctx.path("db")),
        ])
        .is_err());

        assert_eq!(ctx.read("db"), "v1");
        assert_eq!(ctx.read("db-shm"), "shm-1");
        assert_eq!(ctx.read("db.new"), "v2");
    }
}
