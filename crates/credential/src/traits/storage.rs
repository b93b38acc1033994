use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::StorageError;

/// Durable key/value storage
///
/// Implementations must provide per-key consistency; no cross-key
/// transactions are assumed.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a value, overwriting any previous one
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Delete a value; deleting an absent key succeeds
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List keys starting with `prefix`, with the prefix stripped
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read and decode a JSON document
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON document
pub async fn put_json<T: Serialize + Sync>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    storage.put(key, bytes).await
}
