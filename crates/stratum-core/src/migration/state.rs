//! Migration state values broadcast to observers.

use std::fmt;

use super::error::MigrationError;
use crate::version::VersionIdentifier;

/// Progress through a plan, emitted after each committed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationProgress {
    /// Steps committed so far.
    pub current_step: usize,
    /// Steps in the plan.
    pub total_steps: usize,
    /// Human-readable description of the last transition.
    pub description: String,
    /// Version the plan starts from.
    pub source_version: VersionIdentifier,
    /// Version the plan ends at.
    pub destination_version: VersionIdentifier,
}

impl MigrationProgress {
    /// Progress before any step has run.
    pub fn started(
        total_steps: usize,
        source_version: VersionIdentifier,
        destination_version: VersionIdentifier,
    ) -> Self {
        Self {
            current_step: 0,
            total_steps,
            description: format!("migrating {source_version} to {destination_version}"),
            source_version,
            destination_version,
        }
    }

    /// Fraction complete in `[0, 1]`. An empty plan is complete.
    pub fn fraction(&self) -> f64 {
        if self.total_steps == 0 {
            1.0
        } else {
            (self.current_step.min(self.total_steps) as f64) / (self.total_steps as f64)
        }
    }

    /// Check whether every step has been committed.
    pub fn is_complete(&self) -> bool {
        self.current_step >= self.total_steps
    }
}

/// Terminal outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationResult {
    /// Every step committed.
    Success {
        /// Entities reported by the mappers across all steps.
        entities_migrated: u64,
    },
    /// The store was already at the destination version.
    NotNeeded,
}

impl fmt::Display for MigrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationResult::Success { entities_migrated } => {
                write!(f, "migrated {entities_migrated} entities")
            }
            MigrationResult::NotNeeded => write!(f, "no migration needed"),
        }
    }
}

/// State of the migration orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MigrationState {
    /// Nothing has happened yet.
    #[default]
    NotStarted,
    /// A non-empty plan was accepted.
    Preparing,
    /// The store is being snapshotted.
    BackingUp,
    /// Steps are running.
    InProgress(MigrationProgress),
    /// A failed run is being rolled back.
    Restoring,
    /// Terminal: the run succeeded or had nothing to do.
    Completed(MigrationResult),
    /// Terminal: the run failed.
    Failed(MigrationError),
}

impl MigrationState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Completed(_) | MigrationState::Failed(_))
    }

    /// Check if a run is underway.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MigrationState::Preparing
                | MigrationState::BackingUp
                | MigrationState::InProgress(_)
                | MigrationState::Restoring
        )
    }

    /// Progress, while steps are running.
    pub fn progress(&self) -> Option<&MigrationProgress> {
        match self {
            MigrationState::InProgress(progress) => Some(progress),
            _ => None,
        }
    }

    /// Terminal error, if the run failed.
    pub fn error(&self) -> Option<&MigrationError> {
        match self {
            MigrationState::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Check if moving to `next` follows the orchestrator state machine.
    pub fn can_transition_to(&self, next: &MigrationState) -> bool {
        use MigrationState::*;

        match (self, next) {
            (_, NotStarted) => true,
            (NotStarted, Preparing | Completed(_) | Failed(_)) => true,
            (Preparing, BackingUp | InProgress(_) | Failed(_)) => true,
            (BackingUp, InProgress(_) | Failed(_)) => true,
            (InProgress(_), InProgress(_) | Restoring | Completed(_) | Failed(_)) => true,
            (Restoring, Failed(_)) => true,
            _ => false,
        }
    }

    /// Short state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            MigrationState::NotStarted => "not_started",
            MigrationState::Preparing => "preparing",
            MigrationState::BackingUp => "backing_up",
            MigrationState::InProgress(_) => "in_progress",
            MigrationState::Restoring => "restoring",
            MigrationState::Completed(_) => "completed",
            MigrationState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::InProgress(progress) => write!(
                f,
                "in_progress ({}/{})",
                progress.current_step, progress.total_steps
            ),
            MigrationState::Completed(result) => write!(f, "completed: {result}"),
            MigrationState::Failed(err) => write!(f, "failed: {err}"),
            other => f.write_str(other.name()),
        }
    }
}
