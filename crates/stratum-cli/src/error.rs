//! CLI errors.

use stratum_core::{MigrationError, ParseVersionError};
use thiserror::Error;

/// Command errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),

    /// The configuration file could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// A version tag could not be parsed.
    #[error("invalid version: {0}")]
    Version(#[from] ParseVersionError),

    /// Migration subsystem error.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// The command task failed.
    #[error("command failed: {0}")]
    Task(String),
}
