//! Schema mapper capability.
//!
//! How records change shape between two versions is owned by the caller. The
//! executor only asks a [`MapperResolver`] for a [`SchemaMapper`] per hop and
//! applies it to a staging copy of the store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::StoreError;
use crate::store::{JsonDocumentStore, StoreLocation};
use crate::version::VersionIdentifier;

/// Error raised by a mapper while transforming a store.
#[derive(Debug, Error)]
pub enum MapperError {
    /// The store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A single record could not be transformed.
    #[error("record {index}: {reason}")]
    Record {
        /// Position of the record in the store.
        index: usize,
        /// Why the record was rejected.
        reason: String,
    },

    /// Any other mapper failure.
    #[error("{0}")]
    Failed(String),
}

/// Error raised when no mapper can be produced for a hop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Nothing is registered for the hop.
    #[error("no mapper registered for {from} -> {to}")]
    MissingMapping {
        /// Hop source.
        from: VersionIdentifier,
        /// Hop destination.
        to: VersionIdentifier,
    },

    /// One of the versions has no model definition.
    #[error("no model registered for {version}")]
    UnknownModel {
        /// The unknown version.
        version: VersionIdentifier,
    },

    /// A mapper exists but could not be built.
    #[error("mapper for {from} -> {to} could not be created: {reason}")]
    CreationFailed {
        /// Hop source.
        from: VersionIdentifier,
        /// Hop destination.
        to: VersionIdentifier,
        /// Why construction failed.
        reason: String,
    },
}

/// Transforms a store from one schema version to the next.
///
/// `apply` runs on a staging copy; a failure discards the copy, so a mapper
/// never has to clean up after itself.
pub trait SchemaMapper: Send + Sync {
    /// Transform the store in place, returning the number of entities migrated.
    fn apply(&self, store: &StoreLocation) -> Result<u64, MapperError>;
}

/// Produces mappers for single-hop migrations.
pub trait MapperResolver: Send + Sync {
    /// Resolve a mapper for `from -> to`.
    fn resolve(
        &self,
        from: &VersionIdentifier,
        to: &VersionIdentifier,
    ) -> Result<Arc<dyn SchemaMapper>, ResolveError>;
}

/// Resolver backed by an explicit `(from, to)` table.
#[derive(Default, Clone)]
pub struct MapperRegistry {
    mappers: HashMap<(VersionIdentifier, VersionIdentifier), Arc<dyn SchemaMapper>>,
}

impl MapperRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mapper for a hop, replacing any previous one.
    pub fn register(
        &mut self,
        from: VersionIdentifier,
        to: VersionIdentifier,
        mapper: Arc<dyn SchemaMapper>,
    ) -> &mut Self {
        self.mappers.insert((from, to), mapper);
        self
    }

    /// Register a closure as the mapper for a hop.
    pub fn register_fn<F>(&mut self, from: VersionIdentifier, to: VersionIdentifier, f: F) -> &mut Self
    where
        F: Fn(&StoreLocation) -> Result<u64, MapperError> + Send + Sync + 'static,
    {
        self.register(from, to, Arc::new(FnMapper::new(f)))
    }

    /// Check whether a hop has a mapper.
    pub fn contains(&self, from: &VersionIdentifier, to: &VersionIdentifier) -> bool {
        self.mappers.contains_key(&(*from, *to))
    }

    /// Number of registered hops.
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hops: Vec<_> = self.mappers.keys().collect();
        hops.sort();
        f.debug_struct("MapperRegistry").field("hops", &hops).finish()
    }
}

impl MapperResolver for MapperRegistry {
    fn resolve(
        &self,
        from: &VersionIdentifier,
        to: &VersionIdentifier,
    ) -> Result<Arc<dyn SchemaMapper>, ResolveError> {
        self.mappers
            .get(&(*from, *to))
            .cloned()
            .ok_or(ResolveError::MissingMapping {
                from: *from,
                to: *to,
            })
    }
}

/// Mapper wrapping a closure over the store location.
pub struct FnMapper<F> {
    f: F,
}

impl<F> FnMapper<F>
where
    F: Fn(&StoreLocation) -> Result<u64, MapperError> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> SchemaMapper for FnMapper<F>
where
    F: Fn(&StoreLocation) -> Result<u64, MapperError> + Send + Sync,
{
    fn apply(&self, store: &StoreLocation) -> Result<u64, MapperError> {
        (self.f)(store)
    }
}

/// Mapper that rewrites every record of a [`JsonDocumentStore`].
///
/// The whole document is rewritten or nothing is: a rejected record aborts
/// the mapper before anything is saved.
pub struct RecordMapper<F> {
    documents: JsonDocumentStore,
    transform: F,
}

impl<F> RecordMapper<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync,
{
    /// Create a record mapper from a per-record transform.
    pub fn new(transform: F) -> Self {
        Self {
            documents: JsonDocumentStore::new(),
            transform,
        }
    }
}

impl<F> SchemaMapper for RecordMapper<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync,
{
    fn apply(&self, store: &StoreLocation) -> Result<u64, MapperError> {
        let mut document = self.documents.load(store)?;

        let records = std::mem::take(&mut document.records)
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                (self.transform)(record).map_err(|reason| MapperError::Record { index, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = records.len() as u64;
        document.records = records;
        self.documents.save(store, &document)?;
        Ok(count)
    }
}
