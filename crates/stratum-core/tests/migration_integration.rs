//! Integration tests for the migration orchestrator.

use std::sync::Arc;

use serde_json::{json, Value};
use stratum_core::{
    BackupManager, JsonDocumentStore, MapperRegistry, MigrationConfig, MigrationError,
    MigrationExecutor, MigrationManager, MigrationPlanner, MigrationResult, MigrationState,
    ProgressReporter, RecordMapper, RecoveryRegistry, StoreLocation, StoreMetadata,
    VersionCatalog, VersionIdentifier,
};

fn v(tag: &str) -> VersionIdentifier {
    VersionIdentifier::parse(tag).unwrap()
}

struct TestContext {
    store: StoreLocation,
    docs: JsonDocumentStore,
    backups: Arc<BackupManager>,
    _dir: tempfile::TempDir,
}

impl TestContext {
    /// A notes store at V1_0_0 with two records.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = StoreLocation::new(dir.path().join("notes.json"));
        let docs = JsonDocumentStore::new();
        docs.create(
            &store,
            &v("V1_0_0"),
            vec![
                json!({"title": "groceries", "body": "milk"}),
                json!({"title": "todo", "body": "ship it"}),
            ],
        )
        .unwrap();

        let config = MigrationConfig::default();
        let backups = Arc::new(BackupManager::from_config(&config, store.path()));

        Self {
            store,
            docs,
            backups,
            _dir: dir,
        }
    }

    fn manager(&self, mappers: MapperRegistry) -> MigrationManager {
        let metadata = Arc::new(JsonDocumentStore::new());
        let catalog = VersionCatalog::from_tags(["V1_0_0", "V2_0_0", "V3_0_0"]).unwrap();

        MigrationManager::new(
            Arc::new(MigrationPlanner::new(catalog, metadata.clone())),
            Arc::new(MigrationExecutor::new(Arc::new(mappers), metadata)),
            Arc::clone(&self.backups),
            Arc::new(ProgressReporter::new()),
            Arc::new(RecoveryRegistry::new()),
            MigrationConfig::default(),
        )
    }

    fn stamp(&self) -> String {
        self.docs.read_version_tag(&self.store).unwrap()
    }

    fn records(&self) -> Vec<Value> {
        self.docs.load(&self.store).unwrap().records
    }
}

/// V1 -> V2 adds `archived`, V2 -> V3 renames `body` to `content`.
fn notes_mappers(include_v3: bool) -> MapperRegistry {
    let mut mappers = MapperRegistry::new();
    mappers.register(
        v("V1_0_0"),
        v("V2_0_0"),
        Arc::new(RecordMapper::new(|mut note: Value| {
            note["archived"] = json!(false);
            Ok(note)
        })),
    );
    if include_v3 {
        mappers.register(
            v("V2_0_0"),
            v("V3_0_0"),
            Arc::new(RecordMapper::new(|mut note: Value| {
                let body = note
                    .as_object_mut()
                    .and_then(|fields| fields.remove("body"))
                    .ok_or_else(|| "note has no body".to_string())?;
                note["content"] = body;
                Ok(note)
            })),
        );
    }
    mappers
}

#[tokio::test]
async fn test_multi_hop_migration() {
    let ctx = TestContext::new();
    let manager = ctx.manager(notes_mappers(true));

    let result = manager.perform_migration(&ctx.store).await.unwrap();

    assert_eq!(result, MigrationResult::Success { entities_migrated: 4 });
    assert_eq!(ctx.stamp(), "V3_0_0");
    assert_eq!(
        ctx.records()[0],
        json!({"title": "groceries", "content": "milk", "archived": false})
    );
    assert_eq!(manager.state(), MigrationState::Completed(result));
    assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
}

#[tokio::test]
async fn test_up_to_date_store_is_a_no_op() {
    let ctx = TestContext::new();
    ctx.docs.write_version_tag(&ctx.store, &v("V3_0_0")).unwrap();
    let before = std::fs::read(ctx.store.path()).unwrap();
    let manager = ctx.manager(notes_mappers(true));
    let mut states = manager.subscribe();

    assert!(!manager.check_and_migrate_if_needed(&ctx.store).await.unwrap());
    assert_eq!(states.drain(), vec![MigrationState::NotStarted]);

    let result = manager.perform_migration(&ctx.store).await.unwrap();
    assert_eq!(result, MigrationResult::NotNeeded);
    assert_eq!(manager.state(), MigrationState::Completed(MigrationResult::NotNeeded));
    assert!(ctx.backups.list_backups(&ctx.store).unwrap().is_empty());
    assert!(!ctx.backups.root().exists());
    assert_eq!(std::fs::read(ctx.store.path()).unwrap(), before);
}

#[tokio::test]
async fn test_failed_step_restores_pre_migration_store() {
    let ctx = TestContext::new();
    let before = std::fs::read(ctx.store.path()).unwrap();
    let manager = ctx.manager(notes_mappers(false));
    let mut states = manager.subscribe();

    let err = manager.perform_migration(&ctx.store).await.unwrap_err();

    assert!(matches!(
        &err,
        MigrationError::MappingModelCreationFailed { from, to, .. }
            if *from == v("V2_0_0") && *to == v("V3_0_0")
    ));
    assert_eq!(ctx.stamp(), "V1_0_0");
    assert_eq!(std::fs::read(ctx.store.path()).unwrap(), before);

    let names: Vec<_> = states.drain().iter().map(MigrationState::name).collect();
    assert_eq!(
        names,
        vec![
            "not_started",
            "not_started",
            "preparing",
            "backing_up",
            "in_progress",
            "in_progress",
            "restoring",
            "failed",
        ]
    );
    assert_eq!(manager.state(), MigrationState::Failed(err));
    // The backup outlives the failed run.
    assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let ctx = TestContext::new();
    let manager = ctx.manager(notes_mappers(true));
    let mut states = manager.subscribe();

    manager.perform_migration(&ctx.store).await.unwrap();

    let progress: Vec<_> = states
        .drain()
        .into_iter()
        .filter_map(|state| state.progress().cloned())
        .collect();
    let fractions: Vec<f64> = progress.iter().map(|p| p.fraction()).collect();

    assert_eq!(fractions, vec![0.0, 0.5, 1.0]);
    assert!(progress.windows(2).all(|w| w[0].current_step < w[1].current_step));
    assert!(progress.iter().all(|p| p.total_steps == 2));
    assert!(progress
        .iter()
        .all(|p| p.source_version == v("V1_0_0") && p.destination_version == v("V3_0_0")));
}

#[tokio::test]
async fn test_concurrent_calls_run_once() {
    let ctx = TestContext::new();
    let manager = ctx.manager(notes_mappers(true));

    let (first, second) = tokio::join!(
        manager.perform_migration(&ctx.store),
        manager.perform_migration(&ctx.store),
    );

    assert_eq!(first.unwrap(), MigrationResult::Success { entities_migrated: 4 });
    assert!(matches!(second, Err(MigrationError::MigrationInProgress { .. })));
    assert_eq!(ctx.stamp(), "V3_0_0");
    assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
}

#[tokio::test]
async fn test_idempotent_after_success() {
    let ctx = TestContext::new();
    let manager = ctx.manager(notes_mappers(true));

    assert!(manager.check_and_migrate_if_needed(&ctx.store).await.unwrap());
    let migrated = ctx.records();

    assert!(!manager.check_and_migrate_if_needed(&ctx.store).await.unwrap());
    assert_eq!(ctx.records(), migrated);
    assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 1);
}

#[tokio::test]
async fn test_retention_across_runs() {
    let ctx = TestContext::new();
    for _ in 0..7 {
        ctx.backups.create_backup(&ctx.store).unwrap();
    }
    assert_eq!(ctx.backups.list_backups(&ctx.store).unwrap().len(), 5);

    let manager = ctx.manager(notes_mappers(true));
    manager.perform_migration(&ctx.store).await.unwrap();

    let backups = ctx.backups.list_backups(&ctx.store).unwrap();
    assert_eq!(backups.len(), 5);
    // The newest bundle is the pre-migration snapshot.
    let restored = ctx.backups.restore_backup(&backups[0], &ctx.store);
    assert!(restored.is_ok());
    assert_eq!(ctx.stamp(), "V1_0_0");
}
