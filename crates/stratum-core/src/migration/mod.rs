//! Versioned schema migration.
//!
//! This module takes a store from the schema version stamped on it to the
//! destination version of a [`VersionCatalog`](crate::VersionCatalog):
//! - Planning a chain of single-hop steps between adjacent versions
//! - Snapshotting the store before the first step
//! - Applying caller-supplied [`SchemaMapper`]s one step at a time
//! - Restoring the snapshot when a step fails
//! - Broadcasting every state transition to observers
//!
//! # Error phases
//!
//! | Phase | Errors | Store | Retryable |
//! |-------|--------|-------|-----------|
//! | **Planning** | `PlanningFailed`, `ModelNotFound`, `IncompatibleModels`, `FileSystemError` | untouched | yes |
//! | **Backup** | `BackupFailed` | untouched | yes |
//! | **Execution** | `StepExecutionFailed`, `MappingModelCreationFailed` | restored from backup | after a fix |
//! | **Recovery** | `RestorationFailed` | integrity uncertain | manual intervention |
//!
//! # Example
//!
//! ```ignore
//! use stratum_core::migration::{MigrationManager, MigrationPlanner, MigrationExecutor, MapperRegistry};
//!
//! let metadata = Arc::new(JsonDocumentStore::new());
//! let planner = MigrationPlanner::new(catalog, metadata.clone());
//! let executor = MigrationExecutor::new(Arc::new(mappers), metadata);
//!
//! let manager = MigrationManager::new(
//!     Arc::new(planner),
//!     Arc::new(executor),
//!     Arc::new(BackupManager::from_config(&config, store.path())),
//!     Arc::new(ProgressReporter::new()),
//!     Arc::new(RecoveryRegistry::new()),
//!     config,
//! );
//!
//! if manager.check_and_migrate_if_needed(&store).await? {
//!     println!("store migrated");
//! }
//! ```

pub mod error;
pub mod executor;
pub mod manager;
pub mod mapper;
pub mod plan;
pub mod planner;
pub mod progress;
pub mod recovery;
pub mod state;

// Error types
pub use error::{ErrorCategory, ErrorPhase, MigrationError};

// Plan types
pub use plan::{MigrationPlan, MigrationStep};
pub use planner::MigrationPlanner;

// Mapper types
pub use mapper::{
    FnMapper, MapperError, MapperRegistry, MapperResolver, RecordMapper, ResolveError,
    SchemaMapper,
};

// Execution and orchestration
pub use executor::MigrationExecutor;
pub use manager::MigrationManager;
pub use recovery::{RecoveryContext, RecoveryRegistry, RecoveryStrategy};

// State types
pub use progress::{ProgressReporter, SharedProgressReporter, StateSubscription};
pub use state::{MigrationProgress, MigrationResult, MigrationState};
