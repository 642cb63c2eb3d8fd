use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{CacheError, CacheResult};

pub type Key = String;

/// Thread-safe in-process map consulted when this node owns a key.
#[derive(Debug)]
pub struct Store<V> {
    data: Arc<RwLock<HashMap<Key, V>>>,
}

impl<V: Clone> Store<V> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<V> {
        let data = self.data.read().await;
        data.get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    /// Insert a new entry. Existing keys are never overwritten.
    pub async fn set(&self, key: Key, value: V) -> CacheResult<()> {
        let mut data = self.data.write().await;
        if data.contains_key(&key) {
            return Err(CacheError::AlreadyExists(key));
        }
        data.insert(key, value);
        Ok(())
    }

    /// Remove an entry. Deleting a missing key succeeds.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }

    pub async fn clear(&self) -> CacheResult<()> {
        let mut data = self.data.write().await;
        data.clear();
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        let data = self.data.read().await;
        data.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        let data = self.data.read().await;
        data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn keys(&self) -> Vec<Key> {
        let data = self.data.read().await;
        data.keys().cloned().collect()
    }
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<V: Clone> Default for Store<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let store: Store<String> = Store::new();

        // Empty store
        assert!(matches!(store.get("key").await, Err(CacheError::NotFound(_))));

        // Set, then reject the duplicate
        store.set("key".to_string(), "value".to_string()).await.unwrap();
        assert!(matches!(
            store.set("key".to_string(), "value2".to_string()).await,
            Err(CacheError::AlreadyExists(_))
        ));
        assert_eq!(store.get("key").await.unwrap(), "value");

        // Delete frees the key for a new write
        store.delete("key").await.unwrap();
        store.set("key2".to_string(), "value2".to_string()).await.unwrap();
        store.set("key".to_string(), "value".to_string()).await.unwrap();
        assert_eq!(store.len().await, 2);

        // Delete of a missing key is fine
        store.delete("nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear() {
        let store: Store<u32> = Store::new();
        for i in 0..5 {
            store.set(format!("key{}", i), i).await.unwrap();
        }
        assert!(store.exists("key3").await);

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
        for i in 0..5 {
            assert!(matches!(
                store.get(&format!("key{}", i)).await,
                Err(CacheError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrent_set_then_get() {
        let store: Store<usize> = Store::new();

        let mut handles = vec![];
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(format!("key{}", i), i).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut handles = vec![];
        for i in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                (i, store.get(&format!("key{}", i)).await)
            }));
        }
        for handle in handles {
            let (i, value) = handle.await.unwrap();
            assert_eq!(value.unwrap(), i);
        }

        assert_eq!(store.len().await, 100);
    }

    #[tokio::test]
    async fn test_empty_values_are_stored() {
        let store: Store<String> = Store::new();
        store.set("blank".to_string(), String::new()).await.unwrap();
        assert_eq!(store.get("blank").await.unwrap(), "");
        assert_eq!(store.keys().await, vec!["blank".to_string()]);
    }
}
