use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{FetchError, Result},
    key::ImageKey,
};

/// File-backed copies of fetched images, one file per key.
///
/// Layout is `<root>/<key segments...>`; keys containing slashes nest into
/// subdirectories. Entries are only ever overwritten, never expired.
#[derive(Clone, Debug)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &ImageKey) -> Option<PathBuf> {
        key.relative_path().map(|rel| self.root.join(rel))
    }

    /// Bytes previously saved for `key`, `None` when absent or unreadable.
    pub async fn load(&self, key: &ImageKey) -> Option<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(
                    key = %key,
                    path = %path.display(),
                    "disk image read failed: {err}"
                );
                None
            }
        }
    }

    /// Write `bytes` for `key`, replacing any previous copy.
    ///
    /// Directory creation is best-effort; only the write itself can fail the
    /// call. The file is written to a temp sibling and renamed into place.
    pub async fn save(&self, key: &ImageKey, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(key).ok_or_else(|| FetchError::DiskWrite {
            path: self.root.clone(),
            message: format!("key {key} has no usable path segment"),
        })?;

        if let Some(parent) = path.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            debug!(
                dir = %parent.display(),
                "disk image dir creation failed, attempting write anyway: {err}"
            );
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(
            ".{file_name}.tmp-{}",
            Uuid::new_v4().simple()
        ));

        let write_err = |err: std::io::Error| FetchError::DiskWrite {
            path: path.clone(),
            message: err.to_string(),
        };

        let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
        if let Err(err) = write_all_and_flush(&mut file, bytes).await {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(err));
        }
        drop(file);

        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(err));
        }

        debug!(key = %key, path = %path.display(), bytes = bytes.len(), "stored image on disk");
        Ok(path)
    }
}

async fn write_all_and_flush(
    file: &mut tokio::fs::File,
    bytes: &[u8],
) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::DiskStore;
    use crate::key::ImageKey;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_creates_nested_directories_and_load_reads_back() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("images"));
        let key = ImageKey::parse("https://x/t/p/w185/a.png?v=2").unwrap();

        let path = store.save(&key, b"first").await.unwrap();
        assert!(path.starts_with(dir.path().join("images").join("t").join("p")));
        assert_eq!(store.load(&key).await.as_deref(), Some(&b"first"[..]));
    }

    #[tokio::test]
    async fn save_overwrites_existing_content() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());
        let key = ImageKey::parse("https://x/a.png").unwrap();

        store.save(&key, b"old").await.unwrap();
        store.save(&key, b"newer").await.unwrap();
        assert_eq!(store.load(&key).await.as_deref(), Some(&b"newer"[..]));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn missing_entry_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = DiskStore::new(dir.path().to_path_buf());
        let key = ImageKey::parse("https://x/missing.png").unwrap();
        assert_eq!(store.load(&key).await, None);
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let dir = tempdir().unwrap();
        // A regular file where the store expects a directory.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let store = DiskStore::new(blocker);
        let key = ImageKey::parse("https://x/a/b.png").unwrap();

        let err = store.save(&key, b"bytes").await.unwrap_err();
        assert!(matches!(err, crate::FetchError::DiskWrite { .. }));
    }
}
