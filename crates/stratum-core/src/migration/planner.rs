//! Migration planning.
//!
//! Resolves the store's stamped version against the registered catalog and
//! walks the catalog to the destination, one step per adjacent pair.

use std::sync::Arc;

use super::error::MigrationError;
use super::plan::MigrationPlan;
use crate::store::{StoreLocation, StoreMetadata};
use crate::version::{VersionCatalog, VersionIdentifier};

/// Plans migrations for stores against a registered-version catalog.
pub struct MigrationPlanner {
    catalog: VersionCatalog,
    metadata: Arc<dyn StoreMetadata>,
    destination: Option<VersionIdentifier>,
}

impl MigrationPlanner {
    /// Create a planner that migrates to the latest registered version.
    pub fn new(catalog: VersionCatalog, metadata: Arc<dyn StoreMetadata>) -> Self {
        Self {
            catalog,
            metadata,
            destination: None,
        }
    }

    /// Pin the destination to a specific registered version.
    pub fn with_destination(mut self, destination: VersionIdentifier) -> Self {
        self.destination = Some(destination);
        self
    }

    /// The registered-version catalog.
    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    /// The version stores are migrated to.
    pub fn destination_version(&self) -> Result<VersionIdentifier, MigrationError> {
        let destination = self
            .destination
            .or_else(|| self.catalog.latest())
            .ok_or_else(|| MigrationError::PlanningFailed {
                reason: "no schema versions are registered".to_string(),
            })?;

        if !self.catalog.contains(&destination) {
            return Err(MigrationError::ModelNotFound {
                reason: format!("destination version {destination} is not registered"),
            });
        }
        Ok(destination)
    }

    /// Read and resolve the version stamped on the store.
    ///
    /// Metadata that cannot be read at all, whether missing, unreadable or
    /// corrupt, is a [`MigrationError::FileSystemError`]. A tag that reads
    /// fine but names no registered version is [`MigrationError::ModelNotFound`].
    pub fn current_version(&self, store: &StoreLocation) -> Result<VersionIdentifier, MigrationError> {
        let tag = self.metadata.read_version_tag(store).map_err(|err| {
            MigrationError::file_system(format!("cannot read version metadata of {store}: {err}"))
        })?;

        let version = VersionIdentifier::parse(&tag).map_err(|err| MigrationError::ModelNotFound {
            reason: format!("store {store} is stamped with {tag:?}: {err}"),
        })?;

        if !self.catalog.contains(&version) {
            return Err(MigrationError::ModelNotFound {
                reason: format!("store {store} is at unregistered version {version}"),
            });
        }
        Ok(version)
    }

    /// Check whether the store's version differs from the destination.
    pub fn requires_migration(&self, store: &StoreLocation) -> Result<bool, MigrationError> {
        let current = self.current_version(store)?;
        let destination = self.destination_version()?;
        Ok(current != destination)
    }

    /// Build the plan for a store. No-op plans have no steps.
    pub fn create_migration_plan(&self, store: &StoreLocation) -> Result<MigrationPlan, MigrationError> {
        let source = self.current_version(store)?;
        let destination = self.destination_version()?;

        if source == destination {
            tracing::debug!(store = %store, version = %source, "store is up to date");
            return Ok(MigrationPlan::empty(store.clone(), source));
        }

        if source > destination {
            return Err(MigrationError::IncompatibleModels {
                from: source,
                to: destination,
                reason: "downgrades are not supported".to_string(),
            });
        }

        let hops = self
            .catalog
            .hops(&source, &destination)
            .filter(|hops| !hops.is_empty())
            .ok_or_else(|| MigrationError::IncompatibleModels {
                from: source,
                to: destination,
                reason: "the version catalog has no path".to_string(),
            })?;

        let plan = MigrationPlan::from_hops(store.clone(), source, destination, hops);
        plan.validate()?;

        tracing::info!(
            store = %store,
            from = %source,
            to = %destination,
            steps = plan.step_count(),
            "migration plan created"
        );

        Ok(plan)
    }
}
