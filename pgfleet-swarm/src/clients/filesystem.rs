//! Host filesystem contract and its local implementation.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{ClientError, ClientResult};

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create `path` and its parents, then set `mode` on `path`.
    async fn create_dir_all(&self, path: &Path, mode: u32) -> ClientResult<()>;

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> ClientResult<()>;

    /// `NotFound` when the file does not exist.
    async fn read_file(&self, path: &Path) -> ClientResult<Vec<u8>>;

    async fn exists(&self, path: &Path) -> ClientResult<bool>;

    /// Change ownership of `path` and everything below it.
    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> ClientResult<()>;

    /// Remove a directory tree. Succeeds when already gone.
    async fn remove_all(&self, path: &Path) -> ClientResult<()>;

    /// Remove a single file. `NotFound` when it does not exist.
    async fn remove_file(&self, path: &Path) -> ClientResult<()>;
}

/// `tokio::fs` backed filesystem of the local host.
#[derive(Debug, Default, Clone)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn create_dir_all(&self, path: &Path, mode: u32) -> ClientResult<()> {
        fs::create_dir_all(path).await?;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> ClientResult<()> {
        // `mode` applies on creation only; an existing file is narrowed before
        // anything is written to it.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .await?;
        file.set_permissions(std::fs::Permissions::from_mode(mode))
            .await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> ClientResult<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    async fn exists(&self, path: &Path) -> ClientResult<bool> {
        Ok(fs::try_exists(path).await?)
    }

    async fn chown_recursive(&self, path: &Path, uid: u32, gid: u32) -> ClientResult<()> {
        let root = path.to_path_buf();
        tokio::task::spawn_blocking(move || chown_tree(&root, uid, gid))
            .await
            .map_err(|e| ClientError::api(format!("chown task failed: {}", e)))?
    }

    async fn remove_all(&self, path: &Path) -> ClientResult<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Directory already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_file(&self, path: &Path) -> ClientResult<()> {
        Ok(fs::remove_file(path).await?)
    }
}

/// Symlinks are re-owned themselves, never followed.
fn chown_tree(path: &Path, uid: u32, gid: u32) -> ClientResult<()> {
    for entry in WalkDir::new(path).follow_links(false).follow_root_links(false) {
        let entry = entry.map_err(|e| ClientError::api(format!("walking {}: {}", path.display(), e)))?;
        std::os::unix::fs::lchown(entry.path(), Some(uid), Some(gid))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_write_read_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let dir = tmp.path().join("inst-1/configs");

        fs.create_dir_all(&dir, 0o700).await.unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let file = dir.join("patroni.yaml");
        fs.write_file(&file, b"scope: db", 0o600).await.unwrap();
        assert_eq!(fs.read_file(&file).await.unwrap(), b"scope: db");
        assert!(fs.exists(&file).await.unwrap());

        fs.remove_all(&tmp.path().join("inst-1")).await.unwrap();
        assert!(!fs.exists(&file).await.unwrap());
        // Already gone is fine.
        fs.remove_all(&tmp.path().join("inst-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_file_narrows_existing_mode() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let key = tmp.path().join("server.key");
        std::fs::write(&key, b"old").unwrap();
        std::fs::set_permissions(&key, std::fs::Permissions::from_mode(0o644)).unwrap();

        fs.write_file(&key, b"secret", 0o600).await.unwrap();
        let mode = std::fs::metadata(&key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&key).unwrap(), b"secret");

        let fresh = tmp.path().join("client.key");
        fs.write_file(&fresh, b"secret", 0o600).await.unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_chown_does_not_follow_symlinks() {
        use std::os::unix::fs::{MetadataExt, symlink};

        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let root = tmp.path().join("inst-1");
        let tablespace = root.join("data/pg_tblspc");
        std::fs::create_dir_all(&tablespace).unwrap();
        std::fs::write(root.join("data/PG_VERSION"), b"17").unwrap();
        // A loop back to the root, and a link to nowhere.
        symlink(&root, tablespace.join("16384")).unwrap();
        symlink(tmp.path().join("missing"), tablespace.join("16385")).unwrap();

        let meta = std::fs::metadata(tmp.path()).unwrap();
        fs.chown_recursive(&root, meta.uid(), meta.gid())
            .await
            .unwrap();
        let link = std::fs::symlink_metadata(tablespace.join("16385")).unwrap();
        assert_eq!(link.uid(), meta.uid());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let err = fs.read_file(&tmp.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
        let err = fs.remove_file(&tmp.path().join("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
