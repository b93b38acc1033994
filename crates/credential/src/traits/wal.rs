use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{StorageError, WalId};

/// A pending write-ahead log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Entry identifier
    pub id: WalId,

    /// Entry kind, used by replay to pick a handler (e.g. `"user"`)
    pub kind: String,

    /// When the entry was written
    pub created_at: DateTime<Utc>,

    /// Kind-specific payload
    pub data: Value,
}

impl WalEntry {
    /// Age of the entry relative to `now`, zero if written in the future
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}

/// Crash-durable write-ahead log
///
/// An entry returned by `put_wal` must survive a process crash until
/// `delete_wal` is called for it.
#[async_trait]
pub trait WriteAheadLog: Send + Sync {
    /// Durably record an entry and return its ID
    async fn put_wal(&self, kind: &str, data: Value) -> Result<WalId, StorageError>;

    /// Read an entry, `None` if it was already deleted
    async fn get_wal(&self, id: &WalId) -> Result<Option<WalEntry>, StorageError>;

    /// Delete an entry; deleting an absent entry succeeds
    async fn delete_wal(&self, id: &WalId) -> Result<(), StorageError>;

    /// IDs of all pending entries
    async fn list_wal(&self) -> Result<Vec<WalId>, StorageError>;
}
