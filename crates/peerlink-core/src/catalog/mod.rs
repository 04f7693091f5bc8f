//! File catalog.
//!
//! The catalog maps a shared file's name to where it lives on disk, how large
//! it is and the SHA-256 of its content. Both sides of a transfer consult it:
//!
//! - the serving side resolves `DOWNLOAD_REQUEST:<name>` to a path, so a
//!   remote peer can never name an arbitrary filesystem path
//! - the receiving side looks up the expected hash to verify what arrived
//!
//! [`FileCatalog`] is the lookup seam. [`MemoryCatalog`] is the in-process
//! implementation, [`CatalogStore`] persists entries as JSON, and
//! [`scan_directory`] builds entries from a folder.

mod scan;
mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use scan::scan_directory;
pub use store::CatalogStore;

/// One catalog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Name peers use to request the file
    pub name: String,
    /// Location on the local filesystem
    pub path: PathBuf,
    /// Size in bytes when the entry was recorded
    pub size: u64,
    /// Lowercase hex SHA-256 of the content
    pub hash: String,
}

impl CatalogEntry {
    /// Create a catalog entry.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, size: u64, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size,
            hash: hash.into(),
        }
    }
}

/// Lookup interface over a set of catalog entries.
///
/// Implementations must be safe to query from many connection tasks at once.
pub trait FileCatalog: Send + Sync {
    /// Find the entry registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn lookup_by_name(&self, name: &str) -> Result<Option<CatalogEntry>>;

    /// Find an entry whose content hash is `hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn lookup_by_hash(&self, hash: &str) -> Result<Option<CatalogEntry>>;
}

/// In-memory catalog keyed by file name.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding `entries`. Later entries replace earlier
    /// ones with the same name.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Insert or replace an entry, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog lock is poisoned.
    pub fn insert(&self, entry: CatalogEntry) -> Result<Option<CatalogEntry>> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.insert(entry.name.clone(), entry))
    }

    /// Insert or replace many entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog lock is poisoned.
    pub fn extend(&self, new_entries: impl IntoIterator<Item = CatalogEntry>) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        for entry in new_entries {
            entries.insert(entry.name.clone(), entry);
        }
        Ok(())
    }

    /// Remove an entry by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog lock is poisoned.
    pub fn remove(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(entries.remove(name))
    }

    /// All entries, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog lock is poisoned.
    pub fn entries(&self) -> Result<Vec<CatalogEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut list: Vec<_> = entries.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileCatalog for MemoryCatalog {
    fn lookup_by_name(&self, name: &str) -> Result<Option<CatalogEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(name).cloned())
    }

    fn lookup_by_hash(&self, hash: &str) -> Result<Option<CatalogEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .find(|entry| entry.hash.eq_ignore_ascii_case(hash))
            .cloned())
    }
}

fn poisoned() -> Error {
    Error::Catalog("catalog lock poisoned".to_string())
}
