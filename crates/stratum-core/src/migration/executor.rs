//! Migration executor - runs a plan step by step.
//!
//! Each step copies the store to a staging sibling, applies the hop's mapper
//! to the copy, stamps the hop's destination version on it and renames the
//! staging files over the live ones. A failed step leaves the live store at
//! the previous step's version.

use std::fs;
use std::io;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::error::MigrationError;
use super::mapper::{MapperResolver, ResolveError, SchemaMapper};
use super::plan::{MigrationPlan, MigrationStep};
use super::state::MigrationProgress;
use crate::store::{replace_all, Replacement, StoreLocation, StoreMetadata};

/// Suffix of the staging copy a step is applied to.
const STAGING_SUFFIX: &str = ".migrating";

/// Runs migration plans against a store.
pub struct MigrationExecutor {
    resolver: Arc<dyn MapperResolver>,
    metadata: Arc<dyn StoreMetadata>,
}

impl MigrationExecutor {
    /// Create a new executor.
    pub fn new(resolver: Arc<dyn MapperResolver>, metadata: Arc<dyn StoreMetadata>) -> Self {
        Self { resolver, metadata }
    }

    /// Execute every step of a plan in order.
    ///
    /// `on_progress` is called after each committed step. The token is
    /// checked before each step; a cancelled run stops with
    /// [`MigrationError::Cancelled`] and leaves the store at the last
    /// committed version.
    ///
    /// Returns the number of entities the mappers reported across all steps.
    pub fn execute_plan<F>(
        &self,
        plan: &MigrationPlan,
        mut on_progress: F,
        cancel: Option<&CancellationToken>,
    ) -> Result<u64, MigrationError>
    where
        F: FnMut(MigrationProgress),
    {
        plan.validate()?;

        let total_steps = plan.step_count();
        let mut entities_migrated = 0u64;

        for (i, step) in plan.steps.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::warn!(
                    store = %plan.store,
                    completed_steps = i,
                    version = %step.source,
                    "migration cancelled"
                );
                return Err(MigrationError::Cancelled {
                    completed_steps: i,
                    version: step.source,
                });
            }

            tracing::debug!(store = %plan.store, step = %step, "executing migration step");
            let entities = self.execute_step(&plan.store, step)?;
            entities_migrated += entities;

            tracing::info!(
                store = %plan.store,
                step = %step,
                entities,
                "migration step committed"
            );

            on_progress(MigrationProgress {
                current_step: i + 1,
                total_steps,
                description: format!("migrated {} to {}", step.source, step.destination),
                source_version: plan.source,
                destination_version: plan.destination,
            });
        }

        Ok(entities_migrated)
    }

    /// Apply one hop atomically.
    pub fn execute_step(&self, store: &StoreLocation, step: &MigrationStep) -> Result<u64, MigrationError> {
        let mapper = self
            .resolver
            .resolve(&step.source, &step.destination)
            .map_err(|err| resolve_error(step, err))?;

        let staging = store.sibling(STAGING_SUFFIX);
        let result = self.run_in_staging(store, &staging, step, mapper.as_ref());
        if result.is_err() {
            discard(&staging);
        }
        result
    }

    fn run_in_staging(
        &self,
        store: &StoreLocation,
        staging: &StoreLocation,
        step: &MigrationStep,
        mapper: &dyn SchemaMapper,
    ) -> Result<u64, MigrationError> {
        copy_store(store, staging).map_err(|err| MigrationError::StepExecutionFailed {
            step: *step,
            reason: format!("cannot stage {store}: {err}"),
        })?;

        let entities = mapper
            .apply(staging)
            .map_err(|err| MigrationError::StepExecutionFailed {
                step: *step,
                reason: err.to_string(),
            })?;

        self.metadata
            .write_version_tag(staging, &step.destination)
            .map_err(|err| MigrationError::StepExecutionFailed {
                step: *step,
                reason: format!("cannot stamp {}: {err}", step.destination),
            })?;

        commit(staging, store).map_err(|err| MigrationError::StepExecutionFailed {
            step: *step,
            reason: format!("cannot commit staged files to {store}: {err}"),
        })?;

        Ok(entities)
    }
}

fn resolve_error(step: &MigrationStep, err: ResolveError) -> MigrationError {
    match err {
        ResolveError::UnknownModel { .. } => MigrationError::ModelNotFound {
            reason: err.to_string(),
        },
        ResolveError::MissingMapping { from, to } => MigrationError::MappingModelCreationFailed {
            from,
            to,
            reason: format!("no mapper registered for step {step}"),
        },
        ResolveError::CreationFailed { from, to, reason } => {
            MigrationError::MappingModelCreationFailed { from, to, reason }
        }
    }
}

/// Copy the primary file and existing companions to `dst`, removing any
/// stale staging files first.
fn copy_store(src: &StoreLocation, dst: &StoreLocation) -> io::Result<()> {
    discard(dst);
    fs::copy(src.path(), dst.path())?;
    for suffix in src.companion_suffixes() {
        let from = src.sibling(suffix);
        if from.path().is_file() {
            fs::copy(from.path(), dst.sibling(suffix).path())?;
        }
    }
    Ok(())
}

/// Swap the staged files in for the live ones, companions first.
///
/// Either every live file is replaced or none is.
fn commit(staging: &StoreLocation, store: &StoreLocation) -> io::Result<()> {
    let mut replacements: Vec<Replacement> = store
        .companion_suffixes()
        .iter()
        .filter_map(|suffix| {
            let staged = staging.sibling(suffix);
            let live = store.sibling(suffix);
            if staged.path().is_file() {
                Some(Replacement::install(staged.path(), live.path()))
            } else if live.path().exists() {
                // The mapper consumed the companion (e.g. checkpointed a WAL).
                Some(Replacement::remove(live.path()))
            } else {
                None
            }
        })
        .collect();
    replacements.push(Replacement::install(staging.path(), store.path()));
    replace_all(&replacements)
}

fn discard(staging: &StoreLocation) {
    for path in std::iter::once(staging.path().to_path_buf()).chain(staging.companion_paths()) {
        if path.exists() {
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove staging file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::migration::error::ErrorPhase;
    use crate::migration::mapper::{MapperError, MapperRegistry, RecordMapper};
    use crate::store::JsonDocumentStore;
    use crate::version::VersionIdentifier;
    use serde_json::json;

    fn v(major: u32) -> VersionIdentifier {
        VersionIdentifier::new(major, 0, 0)
    }

    struct TestContext {
        _dir: tempfile::TempDir,
        store: StoreLocation,
        docs: JsonDocumentStore,
    }

    impl TestContext {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = StoreLocation::new(dir.path().join("notes.json"));
            let docs = JsonDocumentStore::new();
            docs.create(&store, &v(1), vec![json!({"title": "a"}), json!({"title": "b"})])
                .unwrap();
            Self {
                _dir: dir,
                store,
                docs,
            }
        }

        fn plan(&self, to: u32) -> MigrationPlan {
            let hops = (1..to).map(|m| (v(m), v(m + 1)));
            MigrationPlan::from_hops(self.store.clone(), v(1), v(to), hops)
        }

        fn executor(&self, registry: MapperRegistry) -> MigrationExecutor {
            MigrationExecutor::new(Arc::new(registry), Arc::new(JsonDocumentStore::new()))
        }

        fn stamp(&self) -> String {
            self.docs.read_version_tag(&self.store).unwrap()
        }
    }

    fn add_field(name: &'static str) -> RecordMapper<impl Fn(serde_json::Value) -> Result<serde_json::Value, String>> {
        RecordMapper::new(move |mut record| {
            record[name] = json!(true);
            Ok(record)
        })
    }

    #[test]
    fn test_executes_all_steps_and_stamps() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(add_field("archived")));
        registry.register(v(2), v(3), Arc::new(add_field("pinned")));

        let mut reports = Vec::new();
        let entities = ctx
            .executor(registry)
            .execute_plan(&ctx.plan(3), |p| reports.push(p), None)
            .unwrap();

        assert_eq!(entities, 4);
        assert_eq!(ctx.stamp(), "V3_0_0");
        assert_eq!(
            ctx.docs.load(&ctx.store).unwrap().records[0],
            json!({"title": "a", "archived": true, "pinned": true})
        );
        assert_eq!(reports.iter().map(|p| p.current_step).collect::<Vec<_>>(), vec![1, 2]);
        assert!(reports.iter().all(|p| p.total_steps == 2));
        assert!(!ctx.store.sibling(STAGING_SUFFIX).path().exists());
    }

    #[test]
    fn test_missing_mapper_keeps_last_committed_version() {
        let ctx = TestContext::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(add_field("archived")));

        let err = ctx
            .executor(registry)
            .execute_plan(&ctx.plan(3), |_| {}, None)
            .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::MappingModelCreationFailed { from, to, .. } if from == v(2) && to == v(3)
        ));
        assert_eq!(ctx.stamp(), "V2_0_0");
    }

    #[test]
    fn test_failed_mapper_leaves_store_untouched() {
        let ctx = TestContext::new();
        let before = std::fs::read(ctx.store.path()).unwrap();

        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), |store| {
            std::fs::write(store.path(), b"garbage").map_err(StoreError::from)?;
            Err(MapperError::Failed("boom".to_string()))
        });

        let err = ctx
            .executor(registry)
            .execute_plan(&ctx.plan(2), |_| {}, None)
            .unwrap_err();

        assert_eq!(err.step(), Some(&MigrationStep::new(0, v(1), v(2))));
        assert_eq!(std::fs::read(ctx.store.path()).unwrap(), before);
        assert!(!ctx.store.sibling(STAGING_SUFFIX).path().exists());
    }

    #[test]
    fn test_cancel_between_steps() {
        let ctx = TestContext::new();
        let token = CancellationToken::new();
        let mut registry = MapperRegistry::new();
        registry.register(v(1), v(2), Arc::new(add_field("archived")));
        registry.register(v(2), v(3), Arc::new(add_field("pinned")));

        let cancel = token.clone();
        let err = ctx
            .executor(registry)
            .execute_plan(&ctx.plan(3), move |_| cancel.cancel(), Some(&token))
            .unwrap_err();

        assert_eq!(
            err,
            MigrationError::Cancelled {
                completed_steps: 1,
                version: v(2)
            }
        );
        assert_eq!(ctx.stamp(), "V2_0_0");
    }

    #[test]
    fn test_unknown_model_maps_to_model_not_found() {
        struct NoModels;
        impl MapperResolver for NoModels {
            fn resolve(
                &self,
                from: &VersionIdentifier,
                _to: &VersionIdentifier,
            ) -> Result<Arc<dyn SchemaMapper>, ResolveError> {
                Err(ResolveError::UnknownModel { version: *from })
            }
        }

        let ctx = TestContext::new();
        let executor = MigrationExecutor::new(Arc::new(NoModels), Arc::new(JsonDocumentStore::new()));
        let err = executor.execute_plan(&ctx.plan(2), |_| {}, None).unwrap_err();
        assert!(matches!(err, MigrationError::ModelNotFound { .. }));
    }

    #[test]
    fn test_failed_commit_leaves_live_files_untouched() {
        let ctx = TestContext::new();
        let before = std::fs::read(ctx.store.path()).unwrap();
        let wal = ctx.store.companion_paths()[0].clone();
        std::fs::write(&wal, b"wal").unwrap();
        // Occupy the primary's parking spot so its swap fails after the WAL moved in.
        let parked = ctx.store.sibling(".prev");
        std::fs::create_dir(parked.path()).unwrap();
        std::fs::write(parked.path().join("occupied"), b"x").unwrap();

        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), |store| {
            std::fs::write(&store.companion_paths()[0], b"wal-v2").map_err(StoreError::from)?;
            Ok(0)
        });

        let err = ctx
            .executor(registry)
            .execute_plan(&ctx.plan(2), |_| {}, None)
            .unwrap_err();

        assert_eq!(err.step(), Some(&MigrationStep::new(0, v(1), v(2))));
        assert_eq!(err.phase(), ErrorPhase::Execution);
        assert!(!err.is_safely_retryable());
        assert_eq!(std::fs::read(ctx.store.path()).unwrap(), before);
        assert_eq!(std::fs::read(&wal).unwrap(), b"wal");
        assert_eq!(ctx.stamp(), "V1_0_0");
        assert!(!ctx.store.sibling(STAGING_SUFFIX).path().exists());
        assert!(!ctx.store.sibling(STAGING_SUFFIX).companion_paths()[0].exists());
    }

    #[test]
    fn test_companion_files_travel_with_the_store() {
        let ctx = TestContext::new();
        let wal = ctx.store.companion_paths()[0].clone();
        std::fs::write(&wal, b"wal").unwrap();

        let mut registry = MapperRegistry::new();
        registry.register_fn(v(1), v(2), |store| {
            let wal = store.companion_paths()[0].clone();
            std::fs::write(wal, b"wal-v2").map_err(StoreError::from)?;
            Ok(0)
        });

        ctx.executor(registry)
            .execute_plan(&ctx.plan(2), |_| {}, None)
            .unwrap();

        assert_eq!(std::fs::read(&wal).unwrap(), b"wal-v2");
        assert_eq!(ctx.stamp(), "V2_0_0");
    }
}
