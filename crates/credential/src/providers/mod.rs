//! Collaborator implementations
//!
//! - [`MemoryStorage`]: in-memory key/value store
//! - [`StorageWal`]: write-ahead log over any [`Storage`](crate::traits::Storage)
//! - [`StoredLeaseResolver`]: lease from the stored lease configuration
//! - `AwsIdentityProvider` (feature `aws`): IAM users and ECR tokens

mod lease;
mod memory;
mod wal;

#[cfg(feature = "aws")]
mod aws;

pub use lease::StoredLeaseResolver;
pub use memory::MemoryStorage;
pub use wal::{StorageWal, WAL_PREFIX};

#[cfg(feature = "aws")]
pub use aws::{AwsIdentityProvider, AwsProviderConfig};
