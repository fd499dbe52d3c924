//! Metrics wrapper around any [`KeyValueStore`].

use super::{KeyValueStore, StorageError};
use crate::metrics::{Metrics, Timer};
use async_trait::async_trait;
use std::sync::Arc;

/// Forwards every call to the inner store and records operation counts,
/// durations and failures labelled with the bucket name.
///
/// Conflicts (`AlreadyExists`, `DoesNotExist`) are decisive outcomes, not
/// faults, so they count as operations rather than storage errors.
pub struct InstrumentedStore {
    inner: Arc<dyn KeyValueStore>,
    bucket: String,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, bucket: impl Into<String>) -> Self {
        Self {
            inner,
            bucket: bucket.into(),
        }
    }

    fn observe<T>(&self, operation: &str, timer: Timer, result: &Result<T, StorageError>) {
        let metrics = Metrics::get();
        match result {
            Err(e) if !e.is_conflict() => {
                metrics.record_storage_error(operation, &self.bucket, e.kind());
            }
            _ => {
                metrics.record_storage_operation(operation, &self.bucket, timer.elapsed_seconds());
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for InstrumentedStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let timer = Timer::new();
        let result = self.inner.get(key).await;
        self.observe("get", timer, &result);
        result
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let timer = Timer::new();
        let result = self.inner.put(key, value).await;
        self.observe("put", timer, &result);
        result
    }

    async fn exclusive_put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let timer = Timer::new();
        let result = self.inner.exclusive_put(key, value).await;
        self.observe("exclusive_put", timer, &result);
        result
    }

    async fn replace(&self, key: &[u8], value: &[u8]) -> Result<Vec<u8>, StorageError> {
        let timer = Timer::new();
        let result = self.inner.replace(key, value).await;
        self.observe("replace", timer, &result);
        result
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let timer = Timer::new();
        let result = self.inner.delete(key).await;
        self.observe("delete", timer, &result);
        result
    }
}
