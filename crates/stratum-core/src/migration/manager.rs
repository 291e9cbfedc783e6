//! Migration orchestrator.
//!
//! [`MigrationManager`] composes the planner, backup manager and executor
//! behind two entry points and drives the [`ProgressReporter`](super::ProgressReporter) through the
//! migration state machine:
//!
//! ```text
//! NotStarted -> Completed(NotNeeded)                  empty plan
//! NotStarted -> Preparing -> BackingUp -> InProgress  non-empty plan
//! InProgress -> Completed(Success)                    all steps committed
//! InProgress -> Restoring -> Failed                   step failed
//! ```
//!
//! Only one run is in flight per manager. The run itself executes on a
//! spawned task, so dropping the caller's future (e.g. on a timeout) does not
//! release the store while steps are still being applied.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::MigrationError;
use super::executor::MigrationExecutor;
use super::planner::MigrationPlanner;
use super::progress::{SharedProgressReporter, StateSubscription};
use super::recovery::{RecoveryContext, RecoveryRegistry, RecoveryStrategy};
use super::state::{MigrationProgress, MigrationResult, MigrationState};
use crate::backup::{BackupManager, BackupRecord};
use crate::config::MigrationConfig;
use crate::store::StoreLocation;

/// Migration orchestrator.
///
/// Cheap to clone; clones share the same single-flight slot and reporter.
#[derive(Clone)]
pub struct MigrationManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    planner: Arc<MigrationPlanner>,
    executor: Arc<MigrationExecutor>,
    backups: Arc<BackupManager>,
    reporter: SharedProgressReporter,
    recovery: Arc<RecoveryRegistry>,
    config: MigrationConfig,
    /// Cancellation token of the run in flight, if any.
    active: Mutex<Option<CancellationToken>>,
}

impl MigrationManager {
    /// Create an orchestrator from its collaborators.
    ///
    /// `config` owns the retention policy: the backup manager is used with
    /// the config's `should_remove_old_backups` and `max_backups_to_keep`,
    /// whatever retention it was built with. Its root directory is kept.
    pub fn new(
        planner: Arc<MigrationPlanner>,
        executor: Arc<MigrationExecutor>,
        backups: Arc<BackupManager>,
        reporter: SharedProgressReporter,
        recovery: Arc<RecoveryRegistry>,
        config: MigrationConfig,
    ) -> Self {
        let retention = config.retention_limit();
        let backups = if backups.retention() == retention {
            backups
        } else {
            tracing::debug!(?retention, "applying configured backup retention");
            Arc::new(backups.as_ref().clone().with_retention(retention))
        };

        Self {
            inner: Arc::new(ManagerInner {
                planner,
                executor,
                backups,
                reporter,
                recovery,
                config,
                active: Mutex::new(None),
            }),
        }
    }

    /// Migrate the store if its version differs from the destination.
    ///
    /// Returns `Ok(false)` without side effects when the store is up to
    /// date and `Ok(true)` after a successful migration.
    pub async fn check_and_migrate_if_needed(&self, store: &StoreLocation) -> Result<bool, MigrationError> {
        let planner = Arc::clone(&self.inner.planner);
        let target = store.clone();
        let required = run_blocking(move || planner.requires_migration(&target)).await?;

        if !required {
            tracing::debug!(store = %store, "no migration required");
            return Ok(false);
        }

        let result = self.perform_migration(store).await?;
        Ok(matches!(result, MigrationResult::Success { .. }))
    }

    /// Run the full migration state machine for a store.
    ///
    /// Fails with [`MigrationError::MigrationInProgress`] and no side
    /// effects while another run is in flight. Otherwise the reporter ends
    /// in `Completed` or `Failed` before this returns.
    pub async fn perform_migration(&self, store: &StoreLocation) -> Result<MigrationResult, MigrationError> {
        let run = self.begin(store)?;

        let inner = Arc::clone(&self.inner);
        let store = store.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.run(&store, run.token()).await;
            match &outcome {
                Ok(result) => {
                    tracing::info!(store = %store, result = %result, "migration completed");
                    inner.reporter.report_migration_completed(*result);
                }
                Err(err) => {
                    tracing::error!(
                        store = %store,
                        phase = %err.phase(),
                        error = %err,
                        "migration failed"
                    );
                    inner.reporter.report_migration_failed(err.clone());
                }
            }
            drop(run);
            outcome
        });

        task.await
            .map_err(|err| MigrationError::other(format!("migration task aborted: {err}")))?
    }

    /// Request cancellation of the run in flight.
    ///
    /// Takes effect before the next step; returns false if nothing is running.
    pub fn cancel(&self) -> bool {
        match self.inner.active.lock().as_ref() {
            Some(token) => {
                tracing::info!("migration cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Check whether a run is in flight.
    pub fn is_running(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Current state of the orchestrator.
    pub fn state(&self) -> MigrationState {
        self.inner.reporter.current_state()
    }

    /// Subscribe to state transitions.
    pub fn subscribe(&self) -> StateSubscription {
        self.inner.reporter.subscribe()
    }

    /// The shared progress reporter.
    pub fn reporter(&self) -> &SharedProgressReporter {
        &self.inner.reporter
    }

    /// The recovery strategy registry.
    pub fn recovery(&self) -> &Arc<RecoveryRegistry> {
        &self.inner.recovery
    }

    /// The backup manager.
    pub fn backups(&self) -> &Arc<BackupManager> {
        &self.inner.backups
    }

    /// Orchestrator configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.inner.config
    }

    /// Claim the single-flight slot.
    fn begin(&self, store: &StoreLocation) -> Result<ActiveRun, MigrationError> {
        let mut active = self.inner.active.lock();
        if active.is_some() {
            tracing::warn!(store = %store, "migration rejected: another run is in flight");
            return Err(MigrationError::MigrationInProgress {
                store: store.to_string(),
            });
        }

        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(ActiveRun {
            inner: Arc::clone(&self.inner),
            token,
        })
    }
}

impl ManagerInner {
    async fn run(&self, store: &StoreLocation, cancel: CancellationToken) -> Result<MigrationResult, MigrationError> {
        self.reporter.reset();

        let planner = Arc::clone(&self.planner);
        let target = store.clone();
        let plan = run_blocking(move || planner.create_migration_plan(&target))
            .await
            .map_err(|err| self.classify(err, RecoveryContext::Planning))?;

        if plan.is_empty() {
            return Ok(MigrationResult::NotNeeded);
        }

        self.reporter.report_preparation_started();

        let backup = if self.config.should_create_backup {
            self.reporter.report_backup_started();
            let backups = Arc::clone(&self.backups);
            let target = store.clone();
            let record = run_blocking(move || backups.create_backup(&target))
                .await
                .map_err(|err| self.classify(err, RecoveryContext::Backup))?;
            Some(record)
        } else {
            tracing::warn!(store = %store, "migrating without a backup");
            None
        };

        self.reporter.report_migration_started(MigrationProgress::started(
            plan.step_count(),
            plan.source,
            plan.destination,
        ));

        let executor = Arc::clone(&self.executor);
        let reporter = Arc::clone(&self.reporter);
        let outcome = run_blocking(move || {
            executor.execute_plan(&plan, |progress| reporter.update_progress(progress), Some(&cancel))
        })
        .await;

        match outcome {
            Ok(entities_migrated) => Ok(MigrationResult::Success { entities_migrated }),
            Err(err) => Err(self.recover(store, backup, err).await),
        }
    }

    /// Log a failure raised before anything was written.
    fn classify(&self, err: MigrationError, context: RecoveryContext) -> MigrationError {
        let strategy = self.recovery.classify(&err, Some(context));
        tracing::warn!(
            context = %context,
            strategy = %strategy,
            error = %err,
            "migration aborted before any step ran"
        );
        err
    }

    /// Restore the pre-migration backup after a failed step, if the
    /// registry and configuration call for it. Returns the terminal error.
    async fn recover(
        &self,
        store: &StoreLocation,
        backup: Option<BackupRecord>,
        err: MigrationError,
    ) -> MigrationError {
        let strategy = self.recovery.classify(&err, Some(RecoveryContext::Execution));
        tracing::warn!(
            store = %store,
            strategy = %strategy,
            step = ?err.step().map(ToString::to_string),
            error = %err,
            "migration step failed"
        );

        if strategy != RecoveryStrategy::BackupAndRestore {
            return err;
        }
        if !self.config.should_restore_from_backup_on_failure {
            tracing::warn!(store = %store, "restore on failure disabled; store left at last committed version");
            return err;
        }
        let Some(record) = backup else {
            tracing::warn!(store = %store, "no backup taken; store left at last committed version");
            return err;
        };

        self.reporter.report_restoration_started();

        let backups = Arc::clone(&self.backups);
        let target = store.clone();
        let restored = run_blocking(move || backups.restore_backup(&record, &target)).await;

        match restored {
            Ok(()) => {
                tracing::info!(store = %store, "store restored from backup after failed migration");
                err
            }
            Err(restore_err) => {
                tracing::error!(
                    store = %store,
                    error = %restore_err,
                    "restoration failed; store integrity is uncertain"
                );
                let reason = match restore_err {
                    MigrationError::RestorationFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                MigrationError::restoration_failed(reason, Some(err))
            }
        }
    }
}

/// Holds the single-flight slot for one run.
struct ActiveRun {
    inner: Arc<ManagerInner>,
    token: CancellationToken,
}

impl ActiveRun {
    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        *self.inner.active.lock() = None;
    }
}

/// Run store I/O on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, MigrationError>
where
    F: FnOnce() -> Result<T, MigrationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| MigrationError::other(format!("migration worker failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::migration::mapper::{MapperError, MapperRegistry, RecordMapper};
    use crate::migration::ProgressReporter;
    use crate::store::{JsonDocumentStore, StoreMetadata};
    use crate::version::{VersionCatalog, VersionIdentifier};
    use serde_json::json;
    use std::sync::mpsc;

    fn v(major: u32) -> VersionIdentifier {
        VersionIdentifier::new(major, 0, 0)
    }

    struct TestContext {
        dir: tempfile::TempDir,
        store: StoreLocation,
        docs: JsonDocumentStore,
        backups: Arc<BackupManager>,
    }

    impl TestContext {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = StoreLocation::new(dir.path().join("notes.json"));
            let docs = JsonDocumentStore::new();
            docs.create(&store, &v(1), vec![json!({"title": "a"})]).unwrap();
            let backups = Arc::new(BackupManager::new(dir.path().join("backups")));
            Self {
                dir,
                store,
                docs,
                backups,
            }
        }

        fn manager(&self, registry: MapperRegistry, config: MigrationConfig) -> MigrationManager {
            let metadata = Arc::new(JsonDocumentStore::new());
            let catalog = VersionCatalog::from_iter([v(1), v(2), v(3)]);
            MigrationManager::new(
                Arc::new(MigrationPlanner::new(catalog, metadata.clone())),
                Arc::new(MigrationExecutor::new(Arc::new(registry), metadata)),
                Arc::clone(&self.backups),
                Arc::new(ProgressReporter::new()),
                Arc::new(RecoveryRegistry::new()),
                config,
            )
        }

        fn stamp(&self) -> String {
            self.docs.read_version_tag(&self.store).unwrap()
        }
    }

    fn noop() -> RecordMapper<impl Fn(serde_json::Value) -> Result<serde_json::Value, String>> {
        RecordMapper::new(Ok)
    }

    /// Mapper that blocks until the returned sender fires.
    fn gated() -> (mpsc::Sender<()>, impl Fn(&StoreLocation) -> Result<u64, MapperError>) {
        let (tx, rx) = mpsc::channel::<()>();
        let rx = std::sync::Mutex::new(rx);
        let mapper = move |_: &StoreLocation| {
            let _ = rx.lock().map(|rx| rx.recv());
            Ok(1)
        };
        (tx, mapper)
    }

    async fn wait_until_in_progress(sub: &mut StateSubscription) {
        while let Some(state) = sub.recv().await {
            if matches!(state, MigrationState::InProgress(_)) {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let ctx = TestContext::new();
        let (gate, mapper) = gated();
        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), mapper);
        registry.register(v(2), v(3), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default());

        let mut sub = manager.subscribe();
        let first = {
            let manager = manager.clone();
            let store = ctx.store.clone();
            tokio::spawn(async move { manager.perform_migration(&store).await })
        };
        wait_until_in_progress(&mut sub).await;
        assert!(manager.is_running());

        let second = manager.perform_migration(&ctx.store).await;
        assert!(matches!(second, Err(MigrationError::MigrationInProgress { .. })));
        assert!(matches!(manager.state(), MigrationState::InProgress(_)));
        assert!(sub.drain().is_empty());

        gate.send(()).unwrap();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result, MigrationResult::Success { entities_migrated: 2 });
        assert!(!manager.is_running());
        assert_eq!(ctx.stamp(), "V3_0_0");
        assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_steps_keeps_committed_version() {
        let ctx = TestContext::new();
        let (gate, mapper) = gated();
        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), mapper);
        registry.register(v(2), v(3), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default());

        let mut sub = manager.subscribe();
        let run = {
            let manager = manager.clone();
            let store = ctx.store.clone();
            tokio::spawn(async move { manager.perform_migration(&store).await })
        };
        wait_until_in_progress(&mut sub).await;

        assert!(manager.cancel());
        gate.send(()).unwrap();

        let err = run.await.unwrap().unwrap_err();
        assert_eq!(
            err,
            MigrationError::Cancelled {
                completed_steps: 1,
                version: v(2)
            }
        );
        assert_eq!(ctx.stamp(), "V2_0_0");
        assert!(!sub.drain().contains(&MigrationState::Restoring));
        assert_eq!(manager.state(), MigrationState::Failed(err));
        assert!(!manager.cancel());
    }

    #[tokio::test]
    async fn test_restore_disabled_leaves_last_committed_version() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default().without_restore());

        let err = manager.perform_migration(&ctx.store).await.unwrap_err();

        assert!(matches!(err, MigrationError::MappingModelCreationFailed { .. }));
        assert_eq!(ctx.stamp(), "V2_0_0");
        assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_without_backup_no_restore_is_attempted() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default().without_backup());
        let mut sub = manager.subscribe();

        let err = manager.perform_migration(&ctx.store).await.unwrap_err();

        assert!(matches!(err, MigrationError::MappingModelCreationFailed { .. }));
        assert_eq!(ctx.stamp(), "V2_0_0");
        assert!(ctx.backups.list_backups(&ctx.store).unwrap().is_empty());
        let states = sub.drain();
        assert!(!states.contains(&MigrationState::BackingUp));
        assert!(!states.contains(&MigrationState::Restoring));
    }

    #[tokio::test]
    async fn test_failed_restoration_chains_original_error() {
        let ctx = TestContext::new();
        let backups = Arc::clone(&ctx.backups);
        let live = ctx.store.clone();
        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), move |_| {
            // Corrupt the snapshot taken for this run, then fail.
            for record in backups.list_backups(&live).map_err(|e| MapperError::Failed(e.to_string()))? {
                for file in &record.files {
                    std::fs::write(record.bundle_path(file), b"corrupt").map_err(StoreError::from)?;
                }
            }
            Err(MapperError::Failed("mapper crashed".to_string()))
        });
        let manager = ctx.manager(registry, MigrationConfig::default());

        let err = manager.perform_migration(&ctx.store).await.unwrap_err();

        assert!(err.is_unrecoverable());
        let cause = err.cause().unwrap();
        assert!(matches!(cause, MigrationError::StepExecutionFailed { .. }));
        assert_eq!(cause.step().map(|s| (s.source, s.destination)), Some((v(1), v(2))));
        assert_eq!(manager.state(), MigrationState::Failed(err));
    }

    #[tokio::test]
    async fn test_planning_failure_is_terminal_without_backup() {
        let ctx = TestContext::new();
        ctx.docs
            .write_version_tag(&ctx.store, &VersionIdentifier::new(9, 0, 0))
            .unwrap();
        let manager = ctx.manager(MapperRegistry::new(), MigrationConfig::default());

        let err = manager.perform_migration(&ctx.store).await.unwrap_err();

        assert!(matches!(err, MigrationError::ModelNotFound { .. }));
        assert!(err.is_safely_retryable());
        assert!(manager.state().is_terminal());
        assert!(!ctx.dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_configured_retention_applies_to_backups() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(noop()));
        registry.register(v(2), v(3), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default().with_max_backups(1));
        assert_eq!(manager.backups().retention(), Some(1));

        for _ in 0..3 {
            ctx.docs.write_version_tag(&ctx.store, &v(1)).unwrap();
            let result = manager.perform_migration(&ctx.store).await.unwrap();
            assert!(matches!(result, MigrationResult::Success { .. }));
        }

        assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_cleanup_keeps_every_backup() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(noop()));
        registry.register(v(2), v(3), Arc::new(noop()));
        let config = MigrationConfig::default().with_max_backups(1).without_backup_cleanup();
        let manager = ctx.manager(registry, config);
        assert_eq!(manager.backups().retention(), None);

        for _ in 0..3 {
            ctx.docs.write_version_tag(&ctx.store, &v(1)).unwrap();
            manager.perform_migration(&ctx.store).await.unwrap();
        }

        assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reporter_is_reset_between_runs() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(noop()));
        registry.register(v(2), v(3), Arc::new(noop()));
        let manager = ctx.manager(registry, MigrationConfig::default());

        manager.perform_migration(&ctx.store).await.unwrap();
        let mut sub = manager.subscribe();
        let result = manager.perform_migration(&ctx.store).await.unwrap();

        assert_eq!(result, MigrationResult::NotNeeded);
        assert_eq!(
            sub.drain(),
            vec![
                MigrationState::Completed(MigrationResult::Success { entities_migrated: 2 }),
                MigrationState::NotStarted,
                MigrationState::Completed(MigrationResult::NotNeeded),
            ]
        );
    }
}
