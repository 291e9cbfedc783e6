//! Migration-specific error types.

use std::fmt;

use thiserror::Error;

use super::plan::MigrationStep;
use crate::version::VersionIdentifier;

/// When in the migration lifecycle an error arose.
///
/// The phase decides how dangerous the error is: planning and backup errors
/// happen before anything is written, execution errors leave a partially
/// migrated store, recovery errors leave a store of uncertain integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorPhase {
    /// Nothing was touched.
    Planning,
    /// Snapshot could not be taken; nothing was written.
    Backup,
    /// A step ran; the store may need restoration.
    Execution,
    /// Restoration itself failed.
    Recovery,
    /// Rejected or stopped by the orchestrator.
    Coordination,
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPhase::Planning => write!(f, "planning"),
            ErrorPhase::Backup => write!(f, "backup"),
            ErrorPhase::Execution => write!(f, "execution"),
            ErrorPhase::Recovery => write!(f, "recovery"),
            ErrorPhase::Coordination => write!(f, "coordination"),
        }
    }
}

/// Variant-level category of a [`MigrationError`], used as a recovery key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    /// See [`MigrationError::PlanningFailed`].
    Planning,
    /// See [`MigrationError::BackupFailed`].
    Backup,
    /// See [`MigrationError::StepExecutionFailed`].
    StepExecution,
    /// See [`MigrationError::RestorationFailed`].
    Restoration,
    /// See [`MigrationError::IncompatibleModels`].
    IncompatibleModels,
    /// See [`MigrationError::ModelNotFound`].
    ModelNotFound,
    /// See [`MigrationError::MappingModelCreationFailed`].
    MappingModelCreation,
    /// See [`MigrationError::FileSystemError`].
    FileSystem,
    /// See [`MigrationError::Cancelled`].
    Cancelled,
    /// See [`MigrationError::MigrationInProgress`].
    InProgress,
    /// See [`MigrationError::Other`].
    Other,
}

impl ErrorCategory {
    /// All categories.
    pub const ALL: [ErrorCategory; 11] = [
        ErrorCategory::Planning,
        ErrorCategory::Backup,
        ErrorCategory::StepExecution,
        ErrorCategory::Restoration,
        ErrorCategory::IncompatibleModels,
        ErrorCategory::ModelNotFound,
        ErrorCategory::MappingModelCreation,
        ErrorCategory::FileSystem,
        ErrorCategory::Cancelled,
        ErrorCategory::InProgress,
        ErrorCategory::Other,
    ];
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Planning => "planning",
            ErrorCategory::Backup => "backup",
            ErrorCategory::StepExecution => "step_execution",
            ErrorCategory::Restoration => "restoration",
            ErrorCategory::IncompatibleModels => "incompatible_models",
            ErrorCategory::ModelNotFound => "model_not_found",
            ErrorCategory::MappingModelCreation => "mapping_model_creation",
            ErrorCategory::FileSystem => "file_system",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::InProgress => "in_progress",
            ErrorCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// Migration errors.
///
/// Cloneable so the terminal error can be broadcast to every observer.
/// Two errors are equal when they are the same variant with the same
/// description.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// A plan could not be computed.
    #[error("migration planning failed: {reason}")]
    PlanningFailed {
        /// Why planning failed.
        reason: String,
    },

    /// The pre-migration backup could not be taken.
    #[error("backup failed: {reason}")]
    BackupFailed {
        /// Why the backup failed.
        reason: String,
    },

    /// A migration step failed: staging the store, applying its mapper,
    /// stamping the new version or committing the staged files.
    #[error("step {step} failed: {reason}")]
    StepExecutionFailed {
        /// The failing step.
        step: MigrationStep,
        /// Error message.
        reason: String,
    },

    /// Restoring the backup failed; store integrity is uncertain.
    #[error("restoration failed: {reason}")]
    RestorationFailed {
        /// Why restoration failed.
        reason: String,
        /// The error that triggered the restoration, if any.
        #[source]
        cause: Option<Box<MigrationError>>,
    },

    /// No forward migration path exists between the two versions.
    #[error("incompatible models: cannot migrate {from} to {to}: {reason}")]
    IncompatibleModels {
        /// Store version.
        from: VersionIdentifier,
        /// Requested version.
        to: VersionIdentifier,
        /// Why no path exists.
        reason: String,
    },

    /// The store's version does not resolve to a registered version.
    #[error("model not found: {reason}")]
    ModelNotFound {
        /// Description of the lookup failure.
        reason: String,
    },

    /// No mapper could be produced for a hop.
    #[error("mapping model creation failed for {from} -> {to}: {reason}")]
    MappingModelCreationFailed {
        /// Hop source.
        from: VersionIdentifier,
        /// Hop destination.
        to: VersionIdentifier,
        /// Why the mapper is unavailable.
        reason: String,
    },

    /// File system error outside a step (metadata read, backup housekeeping).
    #[error("file system error: {reason}")]
    FileSystemError {
        /// Error message.
        reason: String,
    },

    /// The run was cancelled between steps.
    #[error("migration cancelled after {completed_steps} step(s); store left at {version}")]
    Cancelled {
        /// Steps committed before cancellation.
        completed_steps: usize,
        /// Version the store is stamped with.
        version: VersionIdentifier,
    },

    /// A migration is already running on this manager.
    #[error("migration already in progress for {store}")]
    MigrationInProgress {
        /// Store the rejected call targeted.
        store: String,
    },

    /// Any other failure.
    #[error("{reason}")]
    Other {
        /// Error message.
        reason: String,
    },
}

impl MigrationError {
    /// Wrap a file system level failure.
    pub fn file_system(err: impl fmt::Display) -> Self {
        MigrationError::FileSystemError {
            reason: err.to_string(),
        }
    }

    /// Wrap an arbitrary failure.
    pub fn other(err: impl fmt::Display) -> Self {
        MigrationError::Other {
            reason: err.to_string(),
        }
    }

    /// Restoration failure chained to the error that triggered it.
    pub fn restoration_failed(reason: impl Into<String>, cause: Option<MigrationError>) -> Self {
        MigrationError::RestorationFailed {
            reason: reason.into(),
            cause: cause.map(Box::new),
        }
    }

    /// Variant category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MigrationError::PlanningFailed { .. } => ErrorCategory::Planning,
            MigrationError::BackupFailed { .. } => ErrorCategory::Backup,
            MigrationError::StepExecutionFailed { .. } => ErrorCategory::StepExecution,
            MigrationError::RestorationFailed { .. } => ErrorCategory::Restoration,
            MigrationError::IncompatibleModels { .. } => ErrorCategory::IncompatibleModels,
            MigrationError::ModelNotFound { .. } => ErrorCategory::ModelNotFound,
            MigrationError::MappingModelCreationFailed { .. } => {
                ErrorCategory::MappingModelCreation
            }
            MigrationError::FileSystemError { .. } => ErrorCategory::FileSystem,
            MigrationError::Cancelled { .. } => ErrorCategory::Cancelled,
            MigrationError::MigrationInProgress { .. } => ErrorCategory::InProgress,
            MigrationError::Other { .. } => ErrorCategory::Other,
        }
    }

    /// Lifecycle phase implied by the variant alone.
    ///
    /// Failures while a step touches the store are always
    /// [`MigrationError::StepExecutionFailed`], so a file system error
    /// reported here never comes from a half-applied step.
    pub fn phase(&self) -> ErrorPhase {
        match self {
            MigrationError::PlanningFailed { .. }
            | MigrationError::IncompatibleModels { .. }
            | MigrationError::ModelNotFound { .. }
            | MigrationError::FileSystemError { .. } => ErrorPhase::Planning,
            MigrationError::BackupFailed { .. } => ErrorPhase::Backup,
            MigrationError::StepExecutionFailed { .. }
            | MigrationError::MappingModelCreationFailed { .. }
            | MigrationError::Other { .. } => ErrorPhase::Execution,
            MigrationError::RestorationFailed { .. } => ErrorPhase::Recovery,
            MigrationError::Cancelled { .. } | MigrationError::MigrationInProgress { .. } => {
                ErrorPhase::Coordination
            }
        }
    }

    /// True for failures raised before any destructive action.
    pub fn is_safely_retryable(&self) -> bool {
        matches!(self.phase(), ErrorPhase::Planning | ErrorPhase::Backup)
            || matches!(self, MigrationError::MigrationInProgress { .. })
    }

    /// True when the store's integrity can no longer be assumed.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, MigrationError::RestorationFailed { .. })
    }

    /// The failing step, for step execution errors.
    pub fn step(&self) -> Option<&MigrationStep> {
        match self {
            MigrationError::StepExecutionFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The error that triggered a failed restoration.
    pub fn cause(&self) -> Option<&MigrationError> {
        match self {
            MigrationError::RestorationFailed { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

impl PartialEq for MigrationError {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.to_string() == other.to_string()
    }
}

impl Eq for MigrationError {}
