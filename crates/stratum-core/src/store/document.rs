//! JSON document store.
//!
//! A single JSON file holding the schema version and the records:
//!
//! ```json
//! { "schema_version": "V1_0_0", "records": [ { "id": 1, "name": "a" } ] }
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};

use serde::{Deserialize, Serialize};

use super::{StoreLocation, StoreMetadata};
use crate::error::{StoreError, StoreResult};
use crate::version::VersionIdentifier;

/// On-disk contents of a JSON document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDocument {
    /// Stamped schema version tag.
    pub schema_version: String,
    /// Stored records.
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
}

impl JsonDocument {
    /// Create a document stamped with `version`.
    pub fn new(version: &VersionIdentifier, records: Vec<serde_json::Value>) -> Self {
        Self {
            schema_version: version.tag(),
            records,
        }
    }
}

/// Store implementation backed by one JSON document per store.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentStore;

impl JsonDocumentStore {
    /// Create a new JSON document store handle.
    pub fn new() -> Self {
        Self
    }

    /// Create (or overwrite) a store with the given version and records.
    pub fn create(
        &self,
        store: &StoreLocation,
        version: &VersionIdentifier,
        records: Vec<serde_json::Value>,
    ) -> StoreResult<()> {
        if let Some(parent) = store.path().parent() {
            fs::create_dir_all(parent)?;
        }
        self.save(store, &JsonDocument::new(version, records))
    }

    /// Load the whole document.
    pub fn load(&self, store: &StoreLocation) -> StoreResult<JsonDocument> {
        if !store.exists() {
            return Err(StoreError::NotFound(store.path().to_path_buf()));
        }
        let reader = BufReader::new(File::open(store.path())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Replace the document, writing to a temporary file and renaming it
    /// into place so readers never observe a torn write.
    pub fn save(&self, store: &StoreLocation, document: &JsonDocument) -> StoreResult<()> {
        let tmp = store.sibling(".tmp");
        {
            let file = File::create(tmp.path())?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, document)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(tmp.path(), store.path())?;
        Ok(())
    }
}

impl StoreMetadata for JsonDocumentStore {
    fn read_version_tag(&self, store: &StoreLocation) -> StoreResult<String> {
        Ok(self.load(store)?.schema_version)
    }

    fn write_version_tag(
        &self,
        store: &StoreLocation,
        version: &VersionIdentifier,
    ) -> StoreResult<()> {
        let mut document = self.load(store)?;
        document.schema_version = version.tag();
        self.save(store, &document)
    }
}
