use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::models::DiscoveredFile;
use crate::core::transfer::is_device_removed_error;
use crate::error::{Error, Result};

/// Result of scanning a volume
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Regular files, sorted by path so runs are deterministic
    pub files: Vec<DiscoveredFile>,
    /// Total size of all files in bytes
    pub total_bytes: u64,
}

/// Recursively list regular files under `root`, skipping anything under `exclude`.
///
/// Failing to read `root` itself, or losing the device midway, is
/// [`Error::DriveUnavailable`]. An unreadable entry deeper down is logged and
/// skipped.
pub async fn scan_volume(root: &Path, exclude: Option<&Path>) -> Result<ScanResult> {
    let root = root.to_path_buf();
    let exclude = exclude.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || scan_volume_sync(&root, exclude.as_deref()))
        .await
        .map_err(|e| Error::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

pub fn scan_volume_sync(root: &Path, exclude: Option<&Path>) -> Result<ScanResult> {
    let mut result = ScanResult::default();

    fs::read_dir(root).map_err(|e| Error::DriveUnavailable {
        root: root.to_path_buf(),
        reason: e.to_string(),
    })?;

    scan_recursive(root, root, exclude, &mut result)?;
    result.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

fn scan_recursive(
    root: &Path,
    current: &Path,
    exclude: Option<&Path>,
    result: &mut ScanResult,
) -> Result<()> {
    let entries = match fs::read_dir(current) {
        Ok(entries) => entries,
        Err(e) => return skip_or_abort(root, current, e),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                skip_or_abort(root, current, e)?;
                continue;
            }
        };

        let path = entry.path();
        if exclude.is_some_and(|ex| path.starts_with(ex)) {
            continue;
        }

        // Use symlink_metadata to avoid following symlinks
        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                skip_or_abort(root, &path, e)?;
                continue;
            }
        };

        if metadata.is_dir() {
            scan_recursive(root, &path, exclude, result)?;
        } else if metadata.is_file() {
            result.total_bytes += metadata.len();
            result.files.push(DiscoveredFile {
                path,
                size: metadata.len(),
            });
        }
        // Skip symlinks and other special files
    }

    Ok(())
}

fn skip_or_abort(root: &Path, path: &Path, error: std::io::Error) -> Result<()> {
    if is_device_removed_error(&error) && fs::read_dir(root).is_err() {
        return Err(Error::DriveUnavailable {
            root: root.to_path_buf(),
            reason: format!("device removed while scanning: {}", error),
        });
    }

    warn!(path = %path.display(), error = %error, "Skipping unreadable entry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp = tempdir().unwrap();
        let result = scan_volume(temp.path(), None).await.unwrap();

        assert!(result.files.is_empty());
        assert_eq!(result.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_scan_with_files() {
        let temp = tempdir().unwrap();

        fs::write(temp.path().join("file1.txt"), b"hello").unwrap();
        fs::write(temp.path().join("file2.txt"), b"world!!!").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();
        fs::write(temp.path().join("subdir/nested.txt"), b"nested").unwrap();

        let result = scan_volume(temp.path(), None).await.unwrap();

        assert_eq!(result.files.len(), 3);
        assert_eq!(result.total_bytes, 5 + 8 + 6);
        assert!(result.files.windows(2).all(|w| w[0].path <= w[1].path));
    }

    #[tokio::test]
    async fn excluded_directory_is_not_walked() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.jpg"), b"a").unwrap();
        fs::create_dir(temp.path().join("backup")).unwrap();
        fs::write(temp.path().join("backup/a.jpg"), b"a").unwrap();

        let exclude = temp.path().join("backup");
        let result = scan_volume(temp.path(), Some(&exclude)).await.unwrap();
        assert_eq!(result.files.len(), 1);
    }

    #[tokio::test]
    async fn missing_root_is_drive_unavailable() {
        let temp = tempdir().unwrap();
        let err = scan_volume(&temp.path().join("ejected"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DriveUnavailable { .. }));
    }
}
