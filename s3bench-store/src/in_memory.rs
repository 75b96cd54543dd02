//! In-memory store for tests.
//!
//! This provides an [`ObjectStore`](crate::ObjectStore) backed by a `HashMap`, removing the need
//! for a running S3 service in tests. The store is [`Clone`] so tests can hold a handle for direct
//! inspection while the benchmark owns a shared copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;

use crate::error::{StoreError, StoreResult};

type Store = HashMap<String, Bytes>;

/// An [`ObjectStore`](crate::ObjectStore) keeping all objects in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    store: Arc<Mutex<Store>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an object directly, bypassing the `ObjectStore` trait.
    pub fn insert(&self, key: impl Into<String>, payload: impl Into<Bytes>) {
        self.lock().insert(key.into(), payload.into());
    }

    /// Returns a clone of the stored bytes, if present.
    pub fn get_stored(&self, key: &str) -> Option<Bytes> {
        self.lock().get(key).cloned()
    }

    /// Returns `true` if the store contains an object at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if the store has no objects.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl crate::ObjectStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn put_object(&self, key: &str, payload: Bytes) -> StoreResult<()> {
        self.lock().insert(key.to_owned(), payload);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StoreResult<Bytes> {
        self.lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: key.to_owned() })
    }

    async fn list_objects(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<_> = self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}
