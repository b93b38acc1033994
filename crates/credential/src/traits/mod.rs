//! Collaborator traits: storage, write-ahead log, leases, identity provider

mod identity;
mod lease;
mod storage;
mod wal;

pub use identity::{AccessKey, AuthorizationData, IdentityProvider};
pub use lease::{Lease, LeaseResolver};
pub use storage::{Storage, get_json, put_json};
pub use wal::{WalEntry, WriteAheadLog};
