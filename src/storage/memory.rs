use super::{KeyValueStore, StorageBackend, StorageError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// In-memory storage backend using concurrent hashmaps.
///
/// Data is volatile and lost on shutdown. Each bucket is its own map;
/// conditional writes hold the shard lock across check and write.
pub struct MemoryStorage {
    buckets: DashMap<String, Arc<MemoryBucket>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }
}

impl StorageBackend for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn bucket(&self, name: &str) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        let bucket = self
            .buckets
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryBucket::default()))
            .clone();
        Ok(bucket)
    }

    fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// A single in-memory bucket.
#[derive(Default)]
pub struct MemoryBucket {
    data: DashMap<Vec<u8>, Vec<u8>>,
}

#[async_trait]
impl KeyValueStore for MemoryBucket {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn exclusive_put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }
        match self.data.entry(key.to_vec()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(key.to_vec())),
            Entry::Vacant(slot) => {
                slot.insert(value.to_vec());
                Ok(())
            }
        }
    }

    async fn replace(&self, key: &[u8], value: &[u8]) -> Result<Vec<u8>, StorageError> {
        match self.data.get_mut(key) {
            Some(mut entry) => Ok(std::mem::replace(entry.value_mut(), value.to_vec())),
            None => Err(StorageError::DoesNotExist(key.to_vec())),
        }
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        match self.data.remove(key) {
            Some(_) => Ok(()),
            None => Err(StorageError::DoesNotExist(key.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket() -> Arc<dyn KeyValueStore> {
        MemoryStorage::new().bucket("test").unwrap()
    }

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = bucket();
        store.put(b"key1", b"value1").await.unwrap();

        assert_eq!(store.get(b"key1").await.unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_empty_key() {
        let store = bucket();

        assert!(matches!(store.put(b"", b"v").await, Err(StorageError::InvalidKey)));
        assert!(matches!(
            store.exclusive_put(b"", b"v").await,
            Err(StorageError::InvalidKey)
        ));
        assert_eq!(store.get(b"").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_exclusive_put() {
        let store = bucket();
        store.exclusive_put(b"key", b"first").await.unwrap();

        let err = store.exclusive_put(b"key", b"second").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(ref k) if k == b"key"));
        assert_eq!(store.get(b"key").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_replace_returns_old_value() {
        let store = bucket();
        store.put(b"key", b"v1").await.unwrap();

        assert_eq!(store.replace(b"key", b"v2").await.unwrap(), b"v1".to_vec());
        assert_eq!(store.get(b"key").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_replace_missing_leaves_store_unchanged() {
        let store = bucket();

        let err = store.replace(b"missing", b"v").await.unwrap_err();
        assert!(matches!(err, StorageError::DoesNotExist(_)));
        assert_eq!(store.get(b"missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = bucket();
        store.put(b"key", b"v").await.unwrap();

        store.delete(b"key").await.unwrap();
        assert_eq!(store.get(b"key").await.unwrap(), None);
        assert!(matches!(
            store.delete(b"key").await,
            Err(StorageError::DoesNotExist(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_buckets_are_independent() {
        let storage = MemoryStorage::new();
        let a = storage.bucket("a").unwrap();
        let b = storage.bucket("b").unwrap();

        a.put(b"key", b"in-a").await.unwrap();
        assert_eq!(b.get(b"key").await.unwrap(), None);

        // Reopening a bucket yields the same data.
        let a_again = storage.bucket("a").unwrap();
        assert_eq!(a_again.get(b"key").await.unwrap(), Some(b"in-a".to_vec()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_exclusive_put_race_has_one_winner() {
        let store = bucket();
        let mut tasks = Vec::new();
        for i in 0..32u8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.exclusive_put(b"contended", &[i]).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => wins += 1,
                Err(StorageError::AlreadyExists(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 31);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_delete_race_has_one_winner() {
        let store = bucket();
        store.put(b"contended", b"v").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move { store.delete(b"contended").await }));
        }

        let mut wins = 0;
        let mut missing = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => wins += 1,
                Err(StorageError::DoesNotExist(_)) => missing += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(missing, 32 - 1);
        assert_eq!(store.get(b"contended").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_memory_replace_never_resurrects_deleted_key() {
        let store = bucket();
        for round in 0..8u8 {
            let key = [b'k', round];
            store.put(&key, b"start").await.unwrap();

            let mut replaces = Vec::new();
            for i in 0..8u8 {
                let store = Arc::clone(&store);
                replaces.push(tokio::spawn(async move {
                    store.replace(&key, &[i]).await.map(|old| (i, old))
                }));
            }
            let deleter = {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.delete(&key).await })
            };

            let mut written = Vec::new();
            let mut observed = Vec::new();
            for task in replaces {
                match task.await.unwrap() {
                    Ok((i, old)) => {
                        written.push(vec![i]);
                        observed.push(old);
                    }
                    Err(StorageError::DoesNotExist(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            // Replace never creates, so the delete always finds the key.
            deleter.await.unwrap().unwrap();
            assert_eq!(store.get(&key).await.unwrap(), None);

            // Successful replaces form one chain from "start" that the delete
            // ended: every old value is distinct and came before it.
            written.push(b"start".to_vec());
            observed.sort();
            observed.dedup();
            assert_eq!(observed.len(), written.len() - 1);
            assert!(observed.iter().all(|old| written.contains(old)));
        }
    }
}
