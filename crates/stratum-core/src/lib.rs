//! Stratum Core - Versioned schema migration for local data stores.
//!
//! This crate plans, snapshots, executes and rolls back schema migrations of
//! file-backed stores.

pub mod backup;
pub mod config;
pub mod error;
pub mod migration;
pub mod store;
pub mod version;

pub use backup::{BackupFile, BackupManager, BackupRecord};
pub use config::MigrationConfig;
pub use error::{StoreError, StoreResult};
pub use migration::{
    ErrorCategory, ErrorPhase, MapperError, MapperRegistry, MapperResolver, MigrationError,
    MigrationExecutor, MigrationManager, MigrationPlan, MigrationPlanner, MigrationProgress,
    MigrationResult, MigrationState, MigrationStep, ProgressReporter, RecordMapper,
    RecoveryContext, RecoveryRegistry, RecoveryStrategy, ResolveError, SchemaMapper,
    SharedProgressReporter, StateSubscription,
};
pub use store::{JsonDocument, JsonDocumentStore, StoreLocation, StoreMetadata};
pub use version::{ParseVersionError, VersionCatalog, VersionIdentifier};
