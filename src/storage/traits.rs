use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Transactional key-value operations scoped to a single bucket.
///
/// Every mutating call runs as one serializable transaction: the
/// existence check and the write commit together or not at all.
/// Callers never see a transaction handle.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Unconditional upsert.
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Insert only if the key is absent at commit time.
    async fn exclusive_put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    /// Overwrite an existing key and return the value it held.
    async fn replace(&self, key: &[u8], value: &[u8]) -> Result<Vec<u8>, StorageError>;

    /// Remove an existing key.
    async fn delete(&self, key: &[u8]) -> Result<(), StorageError>;
}

/// An embedded engine holding independent named buckets.
pub trait StorageBackend: Send + Sync {
    /// Short backend label used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Open a bucket, creating it if it does not exist yet.
    fn bucket(&self, name: &str) -> Result<Arc<dyn KeyValueStore>, StorageError>;

    /// Flush everything committed so far to durable storage.
    fn sync(&self) -> Result<(), StorageError>;
}

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid key")]
    InvalidKey,
    #[error("key {} already exists", quoted(.0))]
    AlreadyExists(Vec<u8>),
    #[error("key {} does not exist", quoted(.0))]
    DoesNotExist(Vec<u8>),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("timed out after {waited:?} waiting for store lock {}", .path.display())]
    LockTimeout { path: PathBuf, waited: Duration },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True for the outcomes a caller can act on (pick another key, create
    /// first) as opposed to engine faults.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists(_) | Self::DoesNotExist(_))
    }

    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidKey => "invalid_key",
            Self::AlreadyExists(_) => "already_exists",
            Self::DoesNotExist(_) => "does_not_exist",
            Self::Unavailable(_) => "unavailable",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Io(_) => "io",
        }
    }
}

impl From<lmdb::Error> for StorageError {
    fn from(err: lmdb::Error) -> Self {
        match err {
            lmdb::Error::BadValSize => StorageError::InvalidKey,
            other => StorageError::Unavailable(other.to_string()),
        }
    }
}

fn quoted(key: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_quote_key() {
        let err = StorageError::AlreadyExists(b"dup".to_vec());
        assert_eq!(err.to_string(), "key \"dup\" already exists");

        let err = StorageError::DoesNotExist(b"gone".to_vec());
        assert_eq!(err.to_string(), "key \"gone\" does not exist");
    }

    #[test]
    fn test_conflict_classification() {
        assert!(StorageError::AlreadyExists(b"k".to_vec()).is_conflict());
        assert!(StorageError::DoesNotExist(b"k".to_vec()).is_conflict());
        assert!(!StorageError::InvalidKey.is_conflict());
        assert!(!StorageError::Unavailable("disk".to_string()).is_conflict());
    }

    #[test]
    fn test_lmdb_error_mapping() {
        assert!(matches!(
            StorageError::from(lmdb::Error::BadValSize),
            StorageError::InvalidKey
        ));
        assert!(matches!(
            StorageError::from(lmdb::Error::Corrupted),
            StorageError::Unavailable(_)
        ));
    }
}
