/// Object storage for uploaded media
///
/// The task creation workflow hands decoded payloads to an [`ObjectStorage`]
/// and records the returned public URL. Three implementations ship with the
/// crate:
///
/// - [`S3Storage`] uploads to an S3-compatible bucket
/// - [`LocalStorage`] writes under a directory served at a public base URL
/// - [`MemoryStorage`] keeps objects in memory and can be told to fail,
///   which is how the rollback path is exercised in tests
///
/// # Example
///
/// ```no_run
/// use bytes::Bytes;
/// use civictask_shared::storage::{LocalStorage, ObjectStorage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = LocalStorage::new("./uploads", "https://cdn.example.com");
/// let stored = storage
///     .put("uploads/images/photo.png", Bytes::from_static(b"\x89PNG"), "image/png")
///     .await?;
/// assert_eq!(stored.url, "https://cdn.example.com/uploads/images/photo.png");
/// # Ok(())
/// # }
/// ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info};

mod s3;

pub use s3::{sign, signing_key, S3Config, S3Storage, Signature};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("I/O error writing '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("invalid storage endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("request signing failed: {0}")]
    Signing(String),

    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("storage provider returned status {status}: {body}")]
    Provider { status: u16, body: String },
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
    pub size: usize,
}

/// Destination for uploaded payloads
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `body` under `key` and returns where it can be fetched
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<StoredObject, StorageError>;
}

/// Rejects empty, absolute, and parent-relative keys
fn validate_key(key: &str) -> Result<(), StorageError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

/// Filesystem-backed storage
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;

        let path = self.root.join(key);
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&path, &body).await.map_err(io_err)?;

        info!(key, content_type, size = body.len(), "Stored object on disk");
        Ok(StoredObject {
            key: key.to_string(),
            url: public_url(&self.public_base_url, key),
            size: body.len(),
        })
    }
}

/// A stored object held by [`MemoryStorage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub content_type: String,
    pub body: Bytes,
}

/// In-memory storage
///
/// With [`MemoryStorage::failing_after`], the first `n` uploads succeed and
/// every later one is rejected.
#[derive(Debug)]
pub struct MemoryStorage {
    base_url: String,
    objects: Mutex<HashMap<String, MemoryObject>>,
    fail_after: Option<usize>,
    attempts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
            fail_after: None,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn failing_after(mut self, successful_uploads: usize) -> Self {
        self.fail_after = Some(successful_uploads);
        self
    }

    pub async fn get(&self, key: &str) -> Option<MemoryObject> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `put` calls, including rejected ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new("memory://")
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<StoredObject, StorageError> {
        validate_key(key)?;

        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if attempt >= limit {
                return Err(StorageError::Rejected(format!(
                    "upload {} refused for '{}'",
                    attempt + 1,
                    key
                )));
            }
        }

        let size = body.len();
        self.objects.lock().await.insert(
            key.to_string(),
            MemoryObject {
                content_type: content_type.to_string(),
                body,
            },
        );

        debug!(key, size, "Stored object in memory");
        Ok(StoredObject {
            key: key.to_string(),
            url: public_url(&self.base_url, key),
            size,
        })
    }
}
