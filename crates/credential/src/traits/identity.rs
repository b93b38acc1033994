use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::{ProviderError, SecureString};

/// Freshly minted access key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: SecureString,
}

/// First authorization entry returned by the registry token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationData {
    /// Base64 `user:password` token for `docker login`
    pub authorization_token: SecureString,
    /// Registry endpoint the token is valid for
    pub proxy_endpoint: String,
    /// When the token stops working
    pub expires_at: Option<DateTime<Utc>>,
}

/// Remote identity provider (IAM users plus the registry token service)
///
/// Delete-style operations report a missing target as
/// [`ProviderError::is_not_found`]; callers decide whether that is an error.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create a user at the given IAM path
    async fn create_identity(&self, name: &str, path: &str) -> Result<(), ProviderError>;

    /// Attach a managed policy to a user
    async fn attach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError>;

    /// Create an access key for a user
    async fn create_access_key(&self, name: &str) -> Result<AccessKey, ProviderError>;

    /// Delete a user; its keys and policy attachments must already be gone
    async fn delete_identity(&self, name: &str) -> Result<(), ProviderError>;

    /// Access key IDs belonging to a user
    async fn list_access_keys(&self, name: &str) -> Result<Vec<String>, ProviderError>;

    /// Delete one access key
    async fn delete_access_key(&self, name: &str, access_key_id: &str)
    -> Result<(), ProviderError>;

    /// Managed policy ARNs attached to a user
    async fn list_attached_policies(&self, name: &str) -> Result<Vec<String>, ProviderError>;

    /// Detach a managed policy from a user
    async fn detach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError>;

    /// Exchange the client's own credentials for a registry token
    async fn exchange_token(&self) -> Result<Vec<AuthorizationData>, ProviderError>;
}
