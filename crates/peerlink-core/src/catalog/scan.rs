//! Build catalog entries from a directory.

use std::path::Path;

use super::CatalogEntry;
use crate::error::{Error, Result};
use crate::hash::hash_file_blocking;

/// Hash every regular file directly inside `dir` into catalog entries.
///
/// Entries are named after the file name and sorted by it. Subdirectories
/// are not descended into; unreadable entries are skipped with a warning.
/// This reads every file in full, so async callers should run it through
/// `tokio::task::spawn_blocking`.
///
/// # Errors
///
/// Returns an error if `dir` is not a readable directory.
pub fn scan_directory(dir: &Path) -> Result<Vec<CatalogEntry>> {
    if !dir.is_dir() {
        return Err(Error::Catalog(format!("{} is not a directory", dir.display())));
    }

    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true);

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("Skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };

        let path = entry.path();
        let size = match entry.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let hash = match hash_file_blocking(path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        entries.push(CatalogEntry::new(name, path, size, hash));
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!("Scanned {} files in {}", entries.len(), dir.display());
    Ok(entries)
}
