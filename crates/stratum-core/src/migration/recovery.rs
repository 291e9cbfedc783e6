//! Recovery strategies for migration errors.
//!
//! The registry maps an error category, optionally narrowed by the phase the
//! error was caught in, to what the orchestrator should do about it. Lookups
//! fall back from `(category, context)` to `(category, None)` to
//! [`RecoveryStrategy::LogOnly`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;

use super::error::{ErrorCategory, MigrationError};

/// What to do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Try the operation again, up to `max_attempts` times.
    Retry {
        /// Attempts allowed before escalating.
        max_attempts: u32,
        /// Pause between attempts.
        delay: Duration,
    },
    /// Restore the pre-migration backup.
    BackupAndRestore,
    /// Stop and surface the error to a person.
    RequireUserInteraction,
    /// Record the error and carry on.
    LogOnly,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryStrategy::Retry {
                max_attempts,
                delay,
            } => write!(f, "retry (max {max_attempts}, every {}ms)", delay.as_millis()),
            RecoveryStrategy::BackupAndRestore => f.write_str("backup_and_restore"),
            RecoveryStrategy::RequireUserInteraction => f.write_str("require_user_interaction"),
            RecoveryStrategy::LogOnly => f.write_str("log_only"),
        }
    }
}

/// Phase an error was caught in, narrowing the strategy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryContext {
    /// Reading the store's version or computing the plan.
    Planning,
    /// Taking the pre-migration snapshot.
    Backup,
    /// Running plan steps.
    Execution,
    /// Restoring a snapshot.
    Restoration,
}

impl fmt::Display for RecoveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryContext::Planning => "planning",
            RecoveryContext::Backup => "backup",
            RecoveryContext::Execution => "execution",
            RecoveryContext::Restoration => "restoration",
        };
        f.write_str(name)
    }
}

type StrategyKey = (ErrorCategory, Option<RecoveryContext>);
type AttemptKey = (ErrorCategory, Option<RecoveryContext>, String);

/// Table of recovery strategies plus per-error attempt counters.
pub struct RecoveryRegistry {
    strategies: RwLock<HashMap<StrategyKey, RecoveryStrategy>>,
    attempts: DashMap<AttemptKey, u32>,
}

impl RecoveryRegistry {
    /// Registry with the default strategy table.
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_defaults();
        registry
    }

    /// Registry with no strategies; every error is `LogOnly`.
    pub fn empty() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            attempts: DashMap::new(),
        }
    }

    fn register_defaults(&self) {
        use ErrorCategory::*;
        use RecoveryContext::Execution;
        use RecoveryStrategy::*;

        let retry = |max_attempts, millis| Retry {
            max_attempts,
            delay: Duration::from_millis(millis),
        };

        let mut strategies = self.strategies.write();
        strategies.extend([
            ((StepExecution, None), BackupAndRestore),
            ((MappingModelCreation, None), BackupAndRestore),
            ((ModelNotFound, None), RequireUserInteraction),
            ((ModelNotFound, Some(Execution)), BackupAndRestore),
            ((FileSystem, None), retry(3, 500)),
            ((FileSystem, Some(Execution)), BackupAndRestore),
            ((ErrorCategory::Other, Some(Execution)), BackupAndRestore),
            ((Planning, None), retry(3, 1000)),
            ((Backup, None), retry(3, 1000)),
            ((IncompatibleModels, None), RequireUserInteraction),
            ((Restoration, None), RequireUserInteraction),
            ((Cancelled, None), LogOnly),
            ((InProgress, None), LogOnly),
            ((ErrorCategory::Other, None), LogOnly),
        ]);
    }

    /// Register a strategy for a category, optionally only in one context.
    pub fn register(
        &self,
        category: ErrorCategory,
        context: Option<RecoveryContext>,
        strategy: RecoveryStrategy,
    ) {
        self.strategies.write().insert((category, context), strategy);
    }

    /// Remove every strategy and attempt counter.
    pub fn clear(&self) {
        self.strategies.write().clear();
        self.attempts.clear();
    }

    /// Strategy registered for an error, without touching attempt counters.
    pub fn classify(&self, error: &MigrationError, context: Option<RecoveryContext>) -> RecoveryStrategy {
        let category = error.category();
        let strategies = self.strategies.read();
        context
            .and_then(|ctx| strategies.get(&(category, Some(ctx))))
            .or_else(|| strategies.get(&(category, None)))
            .copied()
            .unwrap_or(RecoveryStrategy::LogOnly)
    }

    /// Decide what to do about an error, counting retry attempts.
    ///
    /// A `Retry` strategy escalates to `RequireUserInteraction` once the same
    /// error has been seen more than `max_attempts` times.
    pub fn next_action(&self, error: &MigrationError, context: Option<RecoveryContext>) -> RecoveryStrategy {
        let strategy = self.classify(error, context);

        let RecoveryStrategy::Retry { max_attempts, .. } = strategy else {
            tracing::debug!(
                category = %error.category(),
                strategy = %strategy,
                "recovery strategy selected"
            );
            return strategy;
        };

        let key = (error.category(), context, error.to_string());
        let attempt = {
            let mut count = self.attempts.entry(key).or_insert(0);
            *count += 1;
            *count
        };

        if attempt > max_attempts {
            tracing::warn!(
                category = %error.category(),
                attempts = attempt - 1,
                "retry budget exhausted, escalating"
            );
            RecoveryStrategy::RequireUserInteraction
        } else {
            tracing::debug!(
                category = %error.category(),
                attempt,
                max_attempts,
                "retrying after error"
            );
            strategy
        }
    }

    /// Attempts counted so far for an error.
    pub fn attempts(&self, error: &MigrationError, context: Option<RecoveryContext>) -> u32 {
        self.attempts
            .get(&(error.category(), context, error.to_string()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Forget the attempts counted for an error.
    pub fn reset_attempts(&self, error: &MigrationError, context: Option<RecoveryContext>) {
        self.attempts
            .remove(&(error.category(), context, error.to_string()));
    }

    /// Run `op` until it succeeds or the registry stops allowing retries.
    ///
    /// Non-retry strategies return the error immediately. Attempt counters
    /// for errors seen along the way are cleared on success.
    pub async fn retry<T, F, Fut>(&self, context: Option<RecoveryContext>, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MigrationError>>,
    {
        let mut seen: Vec<MigrationError> = Vec::new();
        loop {
            match op().await {
                Ok(value) => {
                    for err in &seen {
                        self.reset_attempts(err, context);
                    }
                    return Ok(value);
                }
                Err(err) => match self.next_action(&err, context) {
                    RecoveryStrategy::Retry { delay, .. } => {
                        if !seen.contains(&err) {
                            seen.push(err);
                        }
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        self.reset_attempts(&err, context);
                        return Err(err);
                    }
                },
            }
        }
    }
}

impl Default for RecoveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RecoveryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRegistry")
            .field("strategies", &self.strategies.read().len())
            .field("tracked_errors", &self.attempts.len())
            .finish()
    }
}
