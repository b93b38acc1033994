//! Write-ahead log layered on any [`Storage`]
//!
//! Each entry is a JSON document under `wal/<id>`. Durability is exactly
//! that of the underlying storage.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::core::{StorageError, WalId};
use crate::traits::{Storage, WalEntry, WriteAheadLog, get_json, put_json};

/// Key prefix under which WAL entries are stored
pub const WAL_PREFIX: &str = "wal/";

/// [`WriteAheadLog`] backed by a [`Storage`]
#[derive(Clone)]
pub struct StorageWal {
    storage: Arc<dyn Storage>,
}

impl StorageWal {
    /// Wrap a storage backend
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    fn key(id: &WalId) -> String {
        format!("{WAL_PREFIX}{id}")
    }
}

impl std::fmt::Debug for StorageWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWal").finish()
    }
}

#[async_trait]
impl WriteAheadLog for StorageWal {
    async fn put_wal(&self, kind: &str, data: Value) -> Result<WalId, StorageError> {
        let entry = WalEntry {
            id: WalId::new(),
            kind: kind.to_string(),
            created_at: Utc::now(),
            data,
        };
        put_json(self.storage.as_ref(), &Self::key(&entry.id), &entry).await?;
        tracing::debug!(wal_id = %entry.id, kind, "WAL entry written");
        Ok(entry.id)
    }

    async fn get_wal(&self, id: &WalId) -> Result<Option<WalEntry>, StorageError> {
        get_json(self.storage.as_ref(), &Self::key(id)).await
    }

    async fn delete_wal(&self, id: &WalId) -> Result<(), StorageError> {
        self.storage.delete(&Self::key(id)).await?;
        tracing::debug!(wal_id = %id, "WAL entry deleted");
        Ok(())
    }

    async fn list_wal(&self) -> Result<Vec<WalId>, StorageError> {
        let keys = self.storage.list(WAL_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let id = WalId::parse(&key);
                if id.is_none() {
                    tracing::warn!(key = %key, "Ignoring WAL key that is not a valid ID");
                }
                id
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = Arc::new(MemoryStorage::new());
        let wal = StorageWal::new(storage.clone());

        let id = wal.put_wal("user", json!({"username": "bob"})).await.unwrap();
        let entry = wal.get_wal(&id).await.unwrap().unwrap();
        assert_eq!(entry.kind, "user");
        assert_eq!(entry.data["username"], "bob");
        assert_eq!(wal.list_wal().await.unwrap(), vec![id.clone()]);

        wal.delete_wal(&id).await.unwrap();
        assert!(wal.get_wal(&id).await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_keys() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put("wal/garbage", b"{}".to_vec()).await.unwrap();
        let wal = StorageWal::new(storage);
        assert!(wal.list_wal().await.unwrap().is_empty());
    }
}
