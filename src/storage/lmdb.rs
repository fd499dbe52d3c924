use super::lock::StoreLock;
use super::{KeyValueStore, StorageBackend, StorageError};
use async_trait::async_trait;
use lmdb::{DatabaseFlags, Environment, EnvironmentFlags, Transaction, WriteFlags};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default map size (1GB). Address space only; disk grows with data.
pub const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

/// Default bound on waiting for another process to release the store.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

const MAX_BUCKETS: u32 = 8;

/// Options for opening an LMDB store.
#[derive(Debug, Clone)]
pub struct LmdbOptions {
    pub map_size: usize,
    pub lock_timeout: Duration,
}

impl Default for LmdbOptions {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

// Field order matters: the environment closes before the lock is released.
struct Shared {
    env: Environment,
    _lock: StoreLock,
}

/// Persistent storage backed by a single LMDB file.
///
/// Buckets are LMDB named databases. LMDB admits one write transaction
/// per environment at a time and lets readers run concurrently, which is
/// what makes the conditional writes below atomic.
pub struct LmdbStorage {
    shared: Arc<Shared>,
}

impl LmdbStorage {
    /// Open (or create) the store at `path` with default options.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open(path, LmdbOptions::default())
    }

    /// Open (or create) the store at `path`.
    ///
    /// Fails with [`StorageError::LockTimeout`] if another process keeps the
    /// store locked for longer than `options.lock_timeout`.
    pub fn open<P: AsRef<Path>>(path: P, options: LmdbOptions) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let lock = StoreLock::acquire(path, options.lock_timeout)?;

        let env = Environment::new()
            .set_flags(EnvironmentFlags::NO_SUB_DIR)
            .set_max_dbs(MAX_BUCKETS)
            .set_map_size(options.map_size)
            .open_with_permissions(path, 0o600)?;

        debug!(path = %path.display(), map_size = options.map_size, "Opened LMDB store");

        Ok(Self {
            shared: Arc::new(Shared { env, _lock: lock }),
        })
    }
}

impl StorageBackend for LmdbStorage {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    fn bucket(&self, name: &str) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        let db = self.shared.env.create_db(Some(name), DatabaseFlags::empty())?;
        Ok(Arc::new(LmdbBucket {
            shared: Arc::clone(&self.shared),
            db,
        }))
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.shared.env.sync(true)?;
        Ok(())
    }
}

/// One named database inside an [`LmdbStorage`].
pub struct LmdbBucket {
    shared: Arc<Shared>,
    db: lmdb::Database,
}

#[async_trait]
impl KeyValueStore for LmdbBucket {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        if key.is_empty() {
            return Ok(None);
        }
        let txn = self.shared.env.begin_ro_txn()?;
        let found = match txn.get(self.db, &key) {
            Ok(bytes) => Some(bytes.to_vec()),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(found)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }
        let mut txn = self.shared.env.begin_rw_txn()?;
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(())
    }

    async fn exclusive_put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }
        let mut txn = self.shared.env.begin_rw_txn()?;
        match txn.put(self.db, &key, &value, WriteFlags::NO_OVERWRITE) {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(lmdb::Error::KeyExist) => Err(StorageError::AlreadyExists(key.to_vec())),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, key: &[u8], value: &[u8]) -> Result<Vec<u8>, StorageError> {
        if key.is_empty() {
            return Err(StorageError::DoesNotExist(key.to_vec()));
        }
        let mut txn = self.shared.env.begin_rw_txn()?;
        let old = match txn.get(self.db, &key) {
            Ok(bytes) => bytes.to_vec(),
            Err(lmdb::Error::NotFound) => return Err(StorageError::DoesNotExist(key.to_vec())),
            Err(e) => return Err(e.into()),
        };
        txn.put(self.db, &key, &value, WriteFlags::empty())?;
        txn.commit()?;
        Ok(old)
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::DoesNotExist(key.to_vec()));
        }
        let mut txn = self.shared.env.begin_rw_txn()?;
        match txn.del(self.db, &key, None) {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(lmdb::Error::NotFound) => Err(StorageError::DoesNotExist(key.to_vec())),
            Err(e) => Err(e.into()),
        }
    }
}
