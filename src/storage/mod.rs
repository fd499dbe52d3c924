//! Storage backend implementations and abstractions.
//!
//! Provides a transactional bucketed key-value store with Memory and LMDB
//! backends.

pub mod buckets;
pub mod instrumented;
pub mod lmdb;
pub mod lock;
pub mod memory;
pub mod traits;

pub use buckets::Buckets;
pub use traits::*;

use crate::config::StorageConfig;
use std::time::Duration;

// Storage factory for creating different backends
pub struct StorageFactory;

impl StorageFactory {
    pub fn create_memory() -> Box<dyn StorageBackend> {
        Box::new(memory::MemoryStorage::new())
    }

    pub fn create_lmdb<P: AsRef<std::path::Path>>(
        path: P,
        options: lmdb::LmdbOptions,
    ) -> Result<Box<dyn StorageBackend>, StorageError> {
        Ok(Box::new(lmdb::LmdbStorage::open(path, options)?))
    }

    pub fn from_config(config: &StorageConfig) -> Result<Box<dyn StorageBackend>, StorageError> {
        match config {
            StorageConfig::Memory => Ok(Self::create_memory()),
            StorageConfig::Lmdb {
                path,
                lock_timeout_ms,
                map_size,
            } => Self::create_lmdb(
                path,
                lmdb::LmdbOptions {
                    map_size: *map_size,
                    lock_timeout: Duration::from_millis(*lock_timeout_ms),
                },
            ),
        }
    }
}
