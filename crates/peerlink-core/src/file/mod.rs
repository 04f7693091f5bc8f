//! Shared folder helpers.
//!
//! The listener answers `LIST_FILES` and `GET_INFO` from the shared folder
//! itself rather than from the catalog, so these helpers read the directory
//! on every call.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Create the shared folder if it does not exist.
///
/// # Errors
///
/// Returns an error if the folder cannot be created.
pub async fn ensure_shared_dir(dir: &Path) -> Result<()> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::create_dir_all(dir).await?;
        tracing::info!("Created shared folder {}", dir.display());
    }
    Ok(())
}

/// Names of the regular files directly inside `dir`, sorted.
///
/// A missing folder lists as empty.
///
/// # Errors
///
/// Returns an error if the folder exists but cannot be read.
pub async fn list_shared_files(dir: &Path) -> Result<Vec<String>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let is_file = match entry.file_type().await {
            Ok(file_type) if file_type.is_symlink() => tokio::fs::metadata(entry.path())
                .await
                .is_ok_and(|m| m.is_file()),
            Ok(file_type) => file_type.is_file(),
            Err(_) => false,
        };

        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

/// Number of regular files directly inside `dir`.
///
/// # Errors
///
/// Returns an error if the folder exists but cannot be read.
pub async fn count_shared_files(dir: &Path) -> Result<usize> {
    Ok(list_shared_files(dir).await?.len())
}

/// Where a download of `file_name` lands inside `dir`.
///
/// Only a bare file name is accepted; anything that would escape `dir`
/// (separators, `..`, absolute paths) is rejected.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for names that are not a single path
/// component.
pub fn destination_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) if !file_name.contains(['/', '\\']) => {
            Ok(dir.join(name))
        }
        _ => Err(Error::InvalidInput(format!(
            "'{file_name}' is not a plain file name"
        ))),
    }
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_destination_path() {
        let base = Path::new("/downloads");
        assert_eq!(
            destination_path(base, "report.pdf").unwrap(),
            PathBuf::from("/downloads/report.pdf")
        );
        assert_eq!(
            destination_path(base, "a:b.txt").unwrap(),
            PathBuf::from("/downloads/a:b.txt")
        );
    }

    #[test]
    fn test_destination_path_traversal() {
        let base = Path::new("/downloads");
        assert!(destination_path(base, "../etc/passwd").is_err());
        assert!(destination_path(base, "..").is_err());
        assert!(destination_path(base, "/etc/passwd").is_err());
        assert!(destination_path(base, "sub/file.txt").is_err());
        assert!(destination_path(base, "sub\\file.txt").is_err());
        assert!(destination_path(base, "").is_err());
    }

    #[tokio::test]
    async fn test_list_shared_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();

        let names = list_shared_files(dir.path()).await.unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(count_shared_files(dir.path()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let names = list_shared_files(&dir.path().join("absent")).await.unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_shared_dir_creates() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("shared_files");

        ensure_shared_dir(&shared).await.unwrap();
        assert!(shared.is_dir());
        ensure_shared_dir(&shared).await.unwrap();
    }
}
