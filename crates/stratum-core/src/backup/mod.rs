//! Store snapshots taken before a migration and restored when it fails.
//!
//! # Layout
//!
//! ```text
//! <backup root>/
//!   app.db-3f9c0a1b2d4e/                 one directory per store
//!     20240611T101502.123456Z/           one bundle per backup
//!       app.db
//!       app.db-wal
//!       manifest.json                    written last; marks the bundle complete
//! ```
//!
//! Bundles are only removed by the retention policy or explicitly, never as
//! a side effect of a migration succeeding or failing.

mod manager;
mod record;

pub use manager::BackupManager;
pub use record::{BackupFile, BackupRecord, MANIFEST_FILE_NAME};
