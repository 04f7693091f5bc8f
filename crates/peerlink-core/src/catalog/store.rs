//! JSON-backed catalog persistence.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{CatalogEntry, MemoryCatalog};
use crate::error::{Error, Result};

const CATALOG_FORMAT_VERSION: u32 = 1;

/// On-disk catalog layout.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    entries: Vec<CatalogEntry>,
}

/// Catalog entries persisted in a JSON file.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    entries: Vec<CatalogEntry>,
}

impl CatalogStore {
    /// Load the catalog from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::default_path().unwrap_or_else(|| PathBuf::from("catalog.json"));
        Self::load_from(path)
    }

    /// Load from a specific path. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let file = fs::File::open(&path).map_err(|e| {
            Error::Catalog(format!("Failed to open catalog at {}: {}", path.display(), e))
        })?;

        let parsed: CatalogFile = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            Error::Catalog(format!("Failed to parse catalog at {}: {}", path.display(), e))
        })?;

        if parsed.version > CATALOG_FORMAT_VERSION {
            tracing::warn!(
                "Catalog at {} has newer format version {}",
                path.display(),
                parsed.version
            );
        }

        Ok(Self {
            path,
            entries: parsed.entries,
        })
    }

    /// Get the default catalog path.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peerlink", "PeerLink")
            .map(|dirs| dirs.data_dir().join("catalog.json"))
    }

    /// Create an empty store that will be written to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    /// Write the catalog file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Catalog(format!(
                    "Failed to create catalog directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = fs::File::create(&self.path).map_err(|e| {
            Error::Catalog(format!(
                "Failed to create catalog at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        let contents = CatalogFile {
            version: CATALOG_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &contents).map_err(|e| {
            Error::Catalog(format!(
                "Failed to write catalog at {}: {}",
                self.path.display(),
                e
            ))
        })?;

        tracing::debug!("Saved {} catalog entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// All stored entries.
    #[must_use]
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Insert or replace an entry by name.
    pub fn upsert(&mut self, entry: CatalogEntry) {
        self.entries.retain(|e| e.name != entry.name);
        self.entries.push(entry);
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Insert or replace many entries.
    pub fn merge(&mut self, entries: impl IntoIterator<Item = CatalogEntry>) {
        for entry in entries {
            self.upsert(entry);
        }
    }

    /// Path of the catalog file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build an in-memory catalog from the stored entries.
    #[must_use]
    pub fn to_memory(&self) -> MemoryCatalog {
        MemoryCatalog::from_entries(self.entries.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileCatalog;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("catalog.json");

        let mut store = CatalogStore::new(&path);
        store.upsert(CatalogEntry::new("b.txt", "/data/b.txt", 3, "bb"));
        store.upsert(CatalogEntry::new("a.txt", "/data/a.txt", 5, "aa"));
        store.save().unwrap();

        let loaded = CatalogStore::load_from(&path).unwrap();
        assert_eq!(loaded.entries().len(), 2);
        assert_eq!(loaded.entries()[0].name, "a.txt");
        assert_eq!(loaded.entries()[1].size, 3);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::load_from(dir.path().join("absent.json")).unwrap();
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, "{ not json").unwrap();

        let err = CatalogStore::load_from(&path).unwrap_err();
        assert_eq!(err.reason(), "CATALOG_ERROR");
    }

    #[test]
    fn test_upsert_replaces_and_to_memory() {
        let mut store = CatalogStore::new("unused.json");
        store.upsert(CatalogEntry::new("a.txt", "/old", 1, "11"));
        store.merge([CatalogEntry::new("a.txt", "/new", 2, "22")]);
        assert_eq!(store.entries().len(), 1);

        let memory = store.to_memory();
        let entry = memory.lookup_by_name("a.txt").unwrap().unwrap();
        assert_eq!(entry.path, PathBuf::from("/new"));
    }
}
