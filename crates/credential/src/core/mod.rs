//! Core types for credential issuance

mod context;
mod error;
mod id;
mod role;
mod secret;
mod secure;

pub use context::RequestContext;
pub use error::{
    CredentialError, ErrorKind, LeaseError, NOT_FOUND_CODE, ProviderError, Result, StorageError,
    UsernameError,
};
pub use id::WalId;
pub use role::{RegistryPermission, Role};
pub use secret::{
    FIELD_ACCESS_KEY, FIELD_SECRET_KEY, INTERNAL_POLICY, INTERNAL_USERNAME, IssuedSecret,
    SECRET_ACCESS_KEY_TYPE, internal_username,
};
pub use secure::SecureString;
