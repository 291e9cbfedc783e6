//! Store handles and the version-metadata capability.
//!
//! The migration subsystem treats a store as opaque files on disk. It needs
//! exactly two things from the storage technology: where the files live
//! ([`StoreLocation`]) and how to read/stamp the schema version
//! ([`StoreMetadata`]). [`JsonDocumentStore`] is the bundled implementation.

mod document;
mod location;
mod swap;

pub use document::{JsonDocument, JsonDocumentStore};
pub use location::{StoreLocation, DEFAULT_COMPANION_SUFFIXES};
pub(crate) use swap::{replace_all, Replacement};

use crate::error::StoreResult;
use crate::version::VersionIdentifier;

/// Capability to read and stamp a store's schema version.
pub trait StoreMetadata: Send + Sync {
    /// Read the raw version tag currently stamped on the store.
    fn read_version_tag(&self, store: &StoreLocation) -> StoreResult<String>;

    /// Stamp a new version on the store.
    fn write_version_tag(&self, store: &StoreLocation, version: &VersionIdentifier)
        -> StoreResult<()>;
}
