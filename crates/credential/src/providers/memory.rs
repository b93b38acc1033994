//! In-memory storage
//!
//! Non-durable; suitable for tests and single-process embedding where a
//! crash also loses every issued identity's bookkeeping.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::core::StorageError;
use crate::traits::Storage;

/// In-memory implementation of [`Storage`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter_map(|entry| entry.key().strip_prefix(prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());

        storage.put("config/root", b"{}".to_vec()).await.unwrap();
        storage.put("wal/a", b"1".to_vec()).await.unwrap();
        storage.put("wal/b", b"2".to_vec()).await.unwrap();

        assert_eq!(
            storage.get("config/root").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert_eq!(storage.list("wal/").await.unwrap(), vec!["a", "b"]);

        storage.delete("wal/a").await.unwrap();
        storage.delete("wal/a").await.unwrap();
        assert_eq!(storage.list("wal/").await.unwrap(), vec!["b"]);
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_storage_missing_key() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("nope").await.unwrap(), None);
    }
}
