//! Backend configuration and its validation contract
//!
//! [`BackendConfig`] replaces process-wide constants: policy ARNs, storage
//! keys, the token retry cap, the user path layout and reconciler timing
//! are all passed explicitly to [`EcrBackend`](crate::backend::EcrBackend).
//!
//! The configuration documents the backend reads from storage at runtime
//! ([`RootConfig`], [`LeaseConfig`]) are plain JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::RegistryPermission;
use crate::rollback::ReconcileConfig;
use crate::token::{TokenRetryPolicy, TokenTtlPolicy};

/// Storage key of the root configuration document
pub const ROOT_CONFIG_KEY: &str = "config/root";
/// Storage key of the lease configuration document
pub const LEASE_CONFIG_KEY: &str = "config/lease";

/// Managed policy granting pull access to ECR
pub const REGISTRY_READ_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly";
/// Managed policy granting push and pull access to ECR
pub const REGISTRY_WRITE_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryPowerUser";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    /// Stored configuration could not be read or decoded
    #[error("Unable to read configuration: {0}")]
    Unreadable(String),
}

/// Trait for configuration sections that must be validated before use
///
/// # Contract
///
/// - `validate()` checks every parameter and returns an error naming the
///   offending field and what is wrong with it
/// - `component_name()` identifies the section in logs
pub trait ValidatedConfig: Send + Sync + Clone {
    /// Validate configuration parameters
    fn validate(&self) -> Result<(), ConfigError>;

    /// Name of the configured component, for logging
    fn component_name(&self) -> &'static str;
}

/// Managed policies attached per registry permission level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyArns {
    /// Policy for `read`
    pub read: String,
    /// Policy for `write`
    pub write: String,
}

impl Default for PolicyArns {
    fn default() -> Self {
        Self {
            read: REGISTRY_READ_POLICY_ARN.into(),
            write: REGISTRY_WRITE_POLICY_ARN.into(),
        }
    }
}

impl PolicyArns {
    /// Policy for the given permission, or `None` for unrecognized levels
    pub fn arn_for(&self, permission: &RegistryPermission) -> Option<&str> {
        match permission {
            RegistryPermission::Read => Some(&self.read),
            RegistryPermission::Write => Some(&self.write),
            RegistryPermission::Other(_) => None,
        }
    }
}

/// How the IAM path of a created user is derived from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserPathStyle {
    /// `/{username}/`
    #[default]
    Nested,
    /// `{username}`
    Bare,
}

impl UserPathStyle {
    /// Render the path for a username
    pub fn path_for(&self, username: &str) -> String {
        match self {
            Self::Nested => format!("/{username}/"),
            Self::Bare => username.to_string(),
        }
    }
}

/// Configuration for the whole backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Storage key of the root configuration document
    pub root_config_key: String,

    /// Storage key of the lease configuration document
    pub lease_config_key: String,

    /// Managed policies per permission level
    pub policies: PolicyArns,

    /// IAM path layout for created users
    pub user_path: UserPathStyle,

    /// Retry policy for the registry token exchange
    pub token_retry: TokenRetryPolicy,

    /// Which TTL the registry token response reports
    pub token_ttl: TokenTtlPolicy,

    /// WAL reconciler timing
    pub reconcile: ReconcileConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            root_config_key: ROOT_CONFIG_KEY.into(),
            lease_config_key: LEASE_CONFIG_KEY.into(),
            policies: PolicyArns::default(),
            user_path: UserPathStyle::default(),
            token_retry: TokenRetryPolicy::default(),
            token_ttl: TokenTtlPolicy::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl ValidatedConfig for BackendConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, key) in [
            ("root_config_key", &self.root_config_key),
            ("lease_config_key", &self.lease_config_key),
        ] {
            if key.is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.into(),
                });
            }
        }

        for (field, arn) in [
            ("policies.read", &self.policies.read),
            ("policies.write", &self.policies.write),
        ] {
            if !arn.starts_with("arn:") {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: format!("'{arn}' is not an ARN"),
                });
            }
        }

        self.token_retry.validate()?;
        self.reconcile.validate()?;
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "ecr-backend"
    }
}

/// Root configuration document stored under [`ROOT_CONFIG_KEY`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// Username template; empty selects the built-in default
    pub username_template: String,

    /// Provider region, informational for adapters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Overrides `token_retry.max_retries` of the backend configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_token_retries: Option<u32>,
}

impl RootConfig {
    /// The template to render, falling back to the built-in default
    pub fn effective_template(&self) -> &str {
        if self.username_template.is_empty() {
            crate::username::DEFAULT_USERNAME_TEMPLATE
        } else {
            &self.username_template
        }
    }

    /// Token retry policy with this document's override applied
    ///
    /// The result is held to the same bounds as the backend's own policy.
    pub fn token_retry(&self, base: &TokenRetryPolicy) -> Result<TokenRetryPolicy, ConfigError> {
        let policy = match self.max_token_retries {
            Some(max_retries) => TokenRetryPolicy {
                max_retries,
                ..base.clone()
            },
            None => base.clone(),
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Lease configuration document stored under [`LEASE_CONFIG_KEY`]
///
/// Zero durations mean "use the system defaults".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Default TTL for issued secrets
    #[serde(with = "humantime_serde")]
    pub lease: Duration,

    /// Maximum lifetime of issued secrets
    #[serde(with = "humantime_serde")]
    pub lease_max: Duration,
}

impl ValidatedConfig for LeaseConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.lease_max.is_zero() && self.lease > self.lease_max {
            return Err(ConfigError::InvalidValue {
                field: "lease".into(),
                reason: format!(
                    "{:?} exceeds lease_max of {:?}",
                    self.lease, self.lease_max
                ),
            });
        }
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "lease"
    }
}
