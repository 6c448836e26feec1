use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("reference {0} does not belong to this store")]
    UnknownReference(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub reference: String,
    pub key: String,
    pub checksum: String,
    pub byte_size: u64,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Uploads atomically: readers never observe a partially written object.
    async fn put(&self, local_path: &Path, suggested_key: &str) -> StorageResult<StoredArtifact>;

    async fn delete(&self, reference: &str) -> StorageResult<()>;
}

/// Stores artifacts under a directory and hands out `file://` references.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|source| StorageError::Io {
                    source,
                    path: root.to_path_buf(),
                })?
                .join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn path_for_reference(&self, reference: &str) -> StorageResult<PathBuf> {
        let unknown = || StorageError::UnknownReference(reference.to_string());
        let url = Url::parse(reference).map_err(|_| unknown())?;
        if url.scheme() != "file" {
            return Err(unknown());
        }
        let path = url.to_file_path().map_err(|_| unknown())?;
        if !path.starts_with(&self.root) {
            return Err(unknown());
        }
        Ok(path)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, local_path: &Path, suggested_key: &str) -> StorageResult<StoredArtifact> {
        let target = self.target_for(suggested_key)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .map_err(|source| StorageError::Io {
                source,
                path: parent.clone(),
            })?;

        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let staging = parent.join(format!(".{file_name}.{}.part", Uuid::new_v4().simple()));

        let copied = copy_with_checksum(local_path, &staging).await;
        let (byte_size, checksum) = match copied {
            Ok(result) => result,
            Err(error) => {
                let _ = fs::remove_file(&staging).await;
                return Err(error);
            }
        };
        if let Err(source) = fs::rename(&staging, &target).await {
            let _ = fs::remove_file(&staging).await;
            return Err(StorageError::Io {
                source,
                path: target,
            });
        }

        let reference = Url::from_file_path(&target)
            .map(|url| url.to_string())
            .map_err(|_| StorageError::InvalidKey(suggested_key.to_string()))?;
        debug!(reference = %reference, bytes = byte_size, "artifact stored");
        Ok(StoredArtifact {
            reference,
            key: suggested_key.to_string(),
            checksum,
            byte_size,
        })
    }

    async fn delete(&self, reference: &str) -> StorageResult<()> {
        let path = self.path_for_reference(reference)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { source, path }),
        }
    }
}

async fn copy_with_checksum(from: &Path, to: &Path) -> StorageResult<(u64, String)> {
    let read_error = |source| StorageError::Io {
        source,
        path: from.to_path_buf(),
    };
    let write_error = |source| StorageError::Io {
        source,
        path: to.to_path_buf(),
    };

    let mut reader = fs::File::open(from).await.map_err(read_error)?;
    let mut writer = fs::File::create(to).await.map_err(write_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let read = reader.read(&mut buffer).await.map_err(read_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read]).await.map_err(write_error)?;
        total += read as u64;
    }
    writer.flush().await.map_err(write_error)?;
    writer.sync_all().await.map_err(write_error)?;
    Ok((total, hex::encode(hasher.finalize())))
}
