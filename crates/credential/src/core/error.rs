//! Error types for credential issuance
//!
//! This module defines the error hierarchy used across the crate:
//! - [`CredentialError`]: top-level error returned by every public operation
//! - [`StorageError`]: key/value and WAL backend failures
//! - [`ProviderError`]: failures reported by the identity provider
//! - [`UsernameError`]: username template parse/render/length failures
//! - [`LeaseError`]: lease resolution failures
//!
//! Every [`CredentialError`] classifies into an [`ErrorKind`], which is what
//! callers should branch on when deciding whether to retry.
//!
//! ```
//! use ecr_credential::core::{CredentialError, ErrorKind, ProviderError};
//!
//! let err = CredentialError::remote("create_user", ProviderError::new("Throttling", "slow down"));
//! assert_eq!(err.kind(), ErrorKind::RemoteApi);
//! assert!(!err.is_retryable());
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Error code the identity provider returns for a principal that does not exist.
pub const NOT_FOUND_CODE: &str = "NoSuchEntity";

/// Top-level error for every credential operation
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Invalid backend or stored configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Username could not be synthesized from the configured template
    #[error("Username error: {0}")]
    Username(#[from] UsernameError),

    /// The transient token-invalidity error persisted through every retry
    #[error("Transient upstream error persisted after {attempts} attempts: {source}")]
    TransientUpstream {
        /// Total attempts made, including the first one
        attempts: u32,
        /// Last error seen
        #[source]
        source: ProviderError,
    },

    /// Any non-retryable identity provider failure
    #[error("Identity provider call '{operation}' failed: {source}")]
    Remote {
        /// Provider operation that failed
        operation: &'static str,
        /// Provider error
        #[source]
        source: ProviderError,
    },

    /// WAL or storage write/delete failure
    #[error("Durable {operation} failed: {source}")]
    Durability {
        /// Storage operation that failed
        operation: &'static str,
        /// Storage error
        #[source]
        source: StorageError,
    },

    /// Identity creation failed and the WAL entry written for it could not be removed
    #[error("Failed to delete WAL entry ({wal}) after identity creation failed: {source}")]
    WalCleanupFailed {
        /// The identity creation failure
        #[source]
        source: ProviderError,
        /// The WAL delete failure
        wal: StorageError,
    },

    /// A secret is missing data required to act on it
    #[error("Secret data integrity error: {reason}")]
    DataIntegrity {
        /// What is missing or malformed
        reason: String,
    },

    /// Lease resolution failed
    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    /// The secret reached its maximum lifetime and cannot be renewed
    #[error("Secret lease cannot be extended past its max TTL of {max_ttl:?}")]
    LeaseExpired {
        /// The secret's max TTL
        max_ttl: Duration,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller must fix configuration; never retried
    Config,
    /// Provider eventual-consistency lag; retried up to a fixed cap
    TransientUpstream,
    /// Any other provider failure; surfaced immediately
    RemoteApi,
    /// WAL/storage failure; fatal to the current operation
    Durability,
    /// Secret internal data missing or malformed
    DataIntegrity,
    /// Lease resolution or extension failure
    Lease,
    /// Cancelled by the caller
    Cancelled,
}

impl CredentialError {
    /// Build a [`CredentialError::Remote`]
    pub fn remote(operation: &'static str, source: ProviderError) -> Self {
        Self::Remote { operation, source }
    }

    /// Build a [`CredentialError::Durability`]
    pub fn durability(operation: &'static str, source: StorageError) -> Self {
        Self::Durability { operation, source }
    }

    /// Build a [`CredentialError::DataIntegrity`]
    pub fn data_integrity(reason: impl Into<String>) -> Self {
        Self::DataIntegrity {
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Username(_) => ErrorKind::Config,
            Self::TransientUpstream { .. } => ErrorKind::TransientUpstream,
            Self::Remote { .. } => ErrorKind::RemoteApi,
            Self::Durability { .. } | Self::WalCleanupFailed { .. } => ErrorKind::Durability,
            Self::DataIntegrity { .. } => ErrorKind::DataIntegrity,
            Self::Lease(_) | Self::LeaseExpired { .. } => ErrorKind::Lease,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientUpstream
    }
}

/// Storage backend errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend read failed
    #[error("Failed to read '{key}': {reason}")]
    ReadFailure {
        /// Storage key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Backend write failed
    #[error("Failed to write '{key}': {reason}")]
    WriteFailure {
        /// Storage key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Backend delete failed
    #[error("Failed to delete '{key}': {reason}")]
    DeleteFailure {
        /// Storage key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Stored bytes could not be decoded
    #[error("Malformed entry at '{key}': {source}")]
    Decode {
        /// Storage key
        key: String,
        /// JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Value could not be encoded for storage
    #[error("Failed to encode entry for '{key}': {source}")]
    Encode {
        /// Storage key
        key: String,
        /// JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned by the identity provider
///
/// Carries the provider's error code and message verbatim so callers can
/// match on specific upstream conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Provider error code (e.g. `NoSuchEntity`)
    pub code: String,
    /// Human-readable message
    pub message: String,
}

impl ProviderError {
    /// Create a provider error from a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Not-found error for the given principal
    pub fn not_found(name: &str) -> Self {
        Self::new(
            NOT_FOUND_CODE,
            format!("The user with name {name} cannot be found."),
        )
    }

    /// Whether the provider reported the target as already absent
    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND_CODE
    }

    /// Whether this error carries the given code and message
    pub fn matches(&self, code: &str, message: &str) -> bool {
        self.code == code && self.message == message
    }
}

/// Username synthesis errors
#[derive(Debug, Error)]
pub enum UsernameError {
    /// The template failed to parse
    #[error("Unable to initialize username template: {0}")]
    Template(String),

    /// Rendering the parsed template failed
    #[error("Failed to generate username: {0}")]
    Generation(String),

    /// The rendered name is longer than the provider allows
    #[error(
        "The username generated by the template exceeds the IAM username length limit of {max} chars (got {length})"
    )]
    LengthExceeded {
        /// Rendered length
        length: usize,
        /// Provider limit
        max: usize,
    },
}

/// Lease resolution errors
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Lease configuration could not be read
    #[error("Unable to read lease configuration: {0}")]
    Storage(#[from] StorageError),

    /// Lease configuration is inconsistent
    #[error("Invalid lease configuration: {0}")]
    Invalid(String),
}

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let transient = CredentialError::TransientUpstream {
            attempts: 31,
            source: ProviderError::new("UnrecognizedClientException", "bad token"),
        };
        assert_eq!(transient.kind(), ErrorKind::TransientUpstream);
        assert!(transient.is_retryable());

        let username = CredentialError::from(UsernameError::LengthExceeded {
            length: 70,
            max: 64,
        });
        assert_eq!(username.kind(), ErrorKind::Config);
        assert!(!username.is_retryable());

        let integrity = CredentialError::data_integrity("secret is missing username internal data");
        assert_eq!(integrity.kind(), ErrorKind::DataIntegrity);
    }

    #[test]
    fn test_wal_cleanup_failure_reports_both() {
        let err = CredentialError::WalCleanupFailed {
            source: ProviderError::new("EntityAlreadyExists", "user exists"),
            wal: StorageError::DeleteFailure {
                key: "wal/abc".into(),
                reason: "disk full".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("disk full"));
        assert!(msg.contains("user exists"));
        assert_eq!(err.kind(), ErrorKind::Durability);
    }

    #[test]
    fn test_provider_not_found() {
        assert!(ProviderError::not_found("vault-alice").is_not_found());
        assert!(!ProviderError::new("AccessDenied", "no").is_not_found());
    }
}
