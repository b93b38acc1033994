//! ECR Credential - dynamic IAM users with crash-safe cleanup
//!
//! Issues short-lived AWS access keys for container registry access. Each
//! issuance creates a brand-new IAM user, attaches a managed ECR policy and
//! mints an access key. A write-ahead log entry guards the sequence, so a
//! user left behind by a crash is found and deleted later.
//!
//! # Features
//!
//! - **WAL-protected issuance** - intent is durable before any remote mutation
//! - **Lease-bound secrets** - TTL/MaxTTL from stored configuration, renewable
//! - **Idempotent revocation** - deleting an absent user succeeds
//! - **Registry tokens** - bounded retry on IAM propagation lag
//! - **Background reconciler** - periodic WAL replay on a tokio task
//!
//! # Cargo features
//!
//! - `aws` - IAM/ECR identity provider on the AWS SDK
//! - `test-util` - mock collaborators in [`testing`]
#![forbid(unsafe_code)]

/// Backend façade wiring configuration and collaborators
pub mod backend;
/// Backend configuration
pub mod config;
/// Core types, errors, and primitives
pub mod core;
/// WAL-protected issuance sequence
pub mod issue;
/// Lease binding, renewal and revocation
pub mod lifecycle;
/// Storage, WAL, lease and identity provider implementations
pub mod providers;
/// Identity teardown and WAL replay
pub mod rollback;
/// Registry token exchange
pub mod token;
/// Collaborator traits
pub mod traits;
/// Username synthesis
pub mod username;

/// Mock collaborators and fixtures
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// ── Root re-exports ─────────────────────────────────────────────────────────
// Commonly-used types available directly as `ecr_credential::TypeName`.

pub use crate::backend::{EcrBackend, EcrBackendBuilder};
pub use crate::config::{BackendConfig, ConfigError, LeaseConfig, RootConfig};
pub use crate::core::{
    CredentialError, ErrorKind, IssuedSecret, ProviderError, RegistryPermission, RequestContext,
    Role, StorageError,
};
pub use crate::issue::{IssueFailure, IssueRequest, PartialIssue};
pub use crate::rollback::SweepReport;
pub use crate::token::RegistryToken;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::backend::{EcrBackend, EcrBackendBuilder};
    pub use crate::config::{
        BackendConfig, ConfigError, LeaseConfig, PolicyArns, RootConfig, UserPathStyle,
        ValidatedConfig,
    };
    pub use crate::core::{
        CredentialError, ErrorKind, IssuedSecret, ProviderError, RegistryPermission,
        RequestContext, Role, SecureString, StorageError,
    };
    pub use crate::issue::{IssueFailure, IssueRequest, IssueState, PartialIssue};
    pub use crate::rollback::{ReconcileConfig, SweepReport};
    pub use crate::token::{RegistryToken, TokenRetryPolicy, TokenTtlPolicy};
    pub use crate::traits::{
        IdentityProvider, Lease, LeaseResolver, Storage, WalEntry, WriteAheadLog,
    };

    pub use crate::providers::{MemoryStorage, StorageWal, StoredLeaseResolver};

    #[cfg(feature = "aws")]
    pub use crate::providers::{AwsIdentityProvider, AwsProviderConfig};
}
