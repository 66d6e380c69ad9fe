// pgsnapshot/src/backup/storage.rs
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::artifact::remove_staging_file;
use super::s3_upload::S3Store;
use crate::config::StorageConfig;
use crate::errors::{BackupError, Result};

/// Durable destination for finished artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable destination, e.g. `s3://bucket` or a directory.
    fn destination(&self) -> String;

    /// Object name `filename` is stored under.
    fn object_key(&self, filename: &str) -> String {
        filename.to_string()
    }

    /// Uploads the file at `path` as `key` and returns its location.
    async fn upload(&self, key: &str, path: &Path) -> Result<String>;

    /// Verifies the destination is reachable and writable without storing
    /// anything permanent.
    async fn check(&self) -> Result<()>;
}

pub async fn build_store(storage: &StorageConfig) -> Result<Box<dyn ObjectStore>> {
    match storage {
        StorageConfig::S3(s3) => Ok(Box::new(S3Store::connect(s3).await)),
        StorageConfig::Local { dir } => Ok(Box::new(LocalDirStore::new(dir.clone()))),
    }
}

/// Copies artifacts into a directory, typically an off-box mount.
///
/// Objects appear atomically: the copy lands in `<key>.tmp` and is renamed
/// into place once complete.
pub struct LocalDirStore {
    dir: PathBuf,
}

impl LocalDirStore {
    pub fn new(dir: PathBuf) -> Self {
        LocalDirStore { dir }
    }

    fn fail(&self, key: &str, source: std::io::Error) -> BackupError {
        BackupError::transfer(self.destination(), key, source)
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    fn destination(&self) -> String {
        self.dir.display().to_string()
    }

    async fn upload(&self, key: &str, path: &Path) -> Result<String> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(BackupError::Transfer {
                destination: self.destination(),
                key: key.to_string(),
                message: "object key must be a plain file name".to_string(),
                source: None,
            });
        }

        let target = self.dir.join(key);
        let partial = self.dir.join(format!("{key}.tmp"));
        info!(source = %path.display(), target = %target.display(), "copying artifact");

        let copied = tokio::fs::copy(path, &partial).await;
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_staging_file(&partial);
                return Err(self.fail(key, e));
            }
        };
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            remove_staging_file(&partial);
            return Err(self.fail(key, e));
        }

        debug!(bytes, "artifact stored");
        Ok(target.display().to_string())
    }

    async fn check(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.dir)
            .await
            .map_err(|e| self.fail("<check>", e))?;
        if !metadata.is_dir() {
            return Err(BackupError::Transfer {
                destination: self.destination(),
                key: "<check>".to_string(),
                message: "destination is not a directory".to_string(),
                source: None,
            });
        }

        let marker = self.dir.join(".pgsnapshot-write-check");
        tokio::fs::write(&marker, b"ok")
            .await
            .map_err(|e| self.fail("<check>", e))?;
        tokio::fs::remove_file(&marker)
            .await
            .map_err(|e| self.fail("<check>", e))?;

        info!(destination = %self.destination(), "local destination is writable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_upload_copies_and_leaves_no_partial() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let artifact = staging.path().join("backup-2024.gz");
        std::fs::write(&artifact, vec![7u8; 4096])?;

        let store = LocalDirStore::new(dest.path().to_path_buf());
        let location = store.upload("backup-2024.gz", &artifact).await?;

        assert_eq!(location, dest.path().join("backup-2024.gz").display().to_string());
        assert_eq!(std::fs::read(dest.path().join("backup-2024.gz"))?, vec![7u8; 4096]);
        assert!(!dest.path().join("backup-2024.gz.tmp").exists());
        // The staging copy is the pipeline's to delete.
        assert!(artifact.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_upload_into_missing_dir_is_transfer_error() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let artifact = staging.path().join("a.gz");
        std::fs::write(&artifact, b"data")?;

        let store = LocalDirStore::new(staging.path().join("missing"));
        let err = store.upload("a.gz", &artifact).await.unwrap_err();
        assert!(matches!(err, BackupError::Transfer { ref key, .. } if key == "a.gz"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_rename_removes_partial_copy() -> anyhow::Result<()> {
        let staging = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let artifact = staging.path().join("a.gz");
        std::fs::write(&artifact, b"data")?;
        // A non-empty directory in the way makes the rename fail.
        std::fs::create_dir(dest.path().join("a.gz"))?;
        std::fs::write(dest.path().join("a.gz").join("keep"), b"x")?;

        let store = LocalDirStore::new(dest.path().to_path_buf());
        let err = store.upload("a.gz", &artifact).await.unwrap_err();

        assert!(matches!(err, BackupError::Transfer { ref key, .. } if key == "a.gz"));
        assert!(!dest.path().join("a.gz.tmp").exists());
        assert!(dest.path().join("a.gz").join("keep").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_upload_rejects_path_keys() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let artifact = dir.path().join("a.gz");
        std::fs::write(&artifact, b"data")?;

        let store = LocalDirStore::new(dir.path().to_path_buf());
        for key in ["../escape.gz", "nested/a.gz", ""] {
            let err = store.upload(key, &artifact).await.unwrap_err();
            assert!(matches!(err, BackupError::Transfer { .. }), "{key}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_local_check() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        LocalDirStore::new(dir.path().to_path_buf()).check().await?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);

        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x")?;
        assert!(LocalDirStore::new(file).check().await.is_err());
        assert!(LocalDirStore::new(dir.path().join("absent")).check().await.is_err());
        Ok(())
    }
}
