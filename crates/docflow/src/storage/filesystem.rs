use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::storage::BlobStore;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// staging directories on another device.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Blob store on the local filesystem. Locations are paths under `root`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target(&self, key: &str) -> Result<PathBuf, StorageError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        if std::fs::symlink_metadata(&path).is_ok() {
            return Err(StorageError::FileExists(path));
        }
        Ok(path)
    }
}

impl BlobStore for LocalBlobStore {
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        let path = self.target(key)?;

        // create_new fails if another writer got there first
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) => {
                return Err(StorageError::WriteFile { path, source: e });
            }
        };
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

        Ok(path.to_string_lossy().into_owned())
    }

    fn put_file(&self, staged: &Path, key: &str) -> Result<String, StorageError> {
        let path = self.target(key)?;
        move_file(staged, &path)?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        std::fs::read(location).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(location.to_string()),
            _ => StorageError::ReadFile {
                path: PathBuf::from(location),
                source: e,
            },
        })
    }

    fn exists(&self, location: &str) -> bool {
        !location.is_empty() && Path::new(location).is_file()
    }

    fn local_path(&self, location: &str) -> Option<PathBuf> {
        Some(PathBuf::from(location))
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        let location = store.put(b"Hello, World!", "2026/01/02/x_a.txt").unwrap();

        assert!(location.ends_with("x_a.txt"));
        assert!(store.exists(&location));
        assert_eq!(store.get(&location).unwrap(), b"Hello, World!");
        assert!(Path::new(&location).starts_with(temp_dir.path()));
    }

    #[test]
    fn test_put_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        store.put(b"first", "k/a.txt").unwrap();
        let result = store.put(b"second", "k/a.txt");
        assert!(matches!(result, Err(StorageError::FileExists(_))));
    }

    #[test]
    fn test_put_file_moves_staged_file() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let staged = staging.join("upload.tmp");
        std::fs::write(&staged, b"staged bytes").unwrap();

        let store = LocalBlobStore::new(temp_dir.path().join("blobs"));
        let location = store.put_file(&staged, "2026/01/02/x_b.txt").unwrap();

        assert!(!staged.exists());
        assert_eq!(store.get(&location).unwrap(), b"staged bytes");
        assert_eq!(store.local_path(&location), Some(PathBuf::from(&location)));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());
        let missing = temp_dir.path().join("nope.txt");

        let result = store.get(&missing.to_string_lossy());
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!store.exists(&missing.to_string_lossy()));
        assert!(!store.exists(""));
    }
}
