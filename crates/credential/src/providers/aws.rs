//! AWS identity provider
//!
//! Implements [`IdentityProvider`] with IAM for the user lifecycle and ECR
//! for registry authorization tokens.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use ecr_credential::providers::{AwsIdentityProvider, AwsProviderConfig};
//!
//! let config = AwsProviderConfig {
//!     region: Some("us-east-1".into()),
//!     ..Default::default()
//! };
//!
//! let provider = AwsIdentityProvider::new(config).await?;
//! ```

use async_trait::async_trait;
use aws_sdk_ecr::Client as EcrClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_iam::error::ProvideErrorMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ValidatedConfig};
use crate::core::{ProviderError, SecureString};
use crate::traits::{AccessKey, AuthorizationData, IdentityProvider};

/// AWS client configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsProviderConfig {
    /// AWS region (auto-detected from the environment if None)
    pub region: Option<String>,

    /// Custom endpoint URL (LocalStack and other AWS-compatible services)
    pub endpoint_url: Option<String>,
}

impl ValidatedConfig for AwsProviderConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint_url
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(ConfigError::InvalidValue {
                field: "endpoint_url".into(),
                reason: format!("'{endpoint}' must start with http:// or https://"),
            });
        }
        if let Some(region) = &self.region
            && region.is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "region".into(),
                reason: "must not be empty when set".into(),
            });
        }
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "aws"
    }
}

/// IAM + ECR backed identity provider
#[derive(Clone, Debug)]
pub struct AwsIdentityProvider {
    iam: IamClient,
    ecr: EcrClient,
}

impl AwsIdentityProvider {
    /// Load SDK configuration from the environment and build both clients
    pub async fn new(config: AwsProviderConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        tracing::info!(
            provider = "aws",
            region = ?config.region,
            endpoint = ?config.endpoint_url,
            "Initialized AWS identity provider"
        );

        Ok(Self::from_clients(
            IamClient::new(&sdk_config),
            EcrClient::new(&sdk_config),
        ))
    }

    /// Use already-built clients (e.g. with caller-managed credentials)
    pub fn from_clients(iam: IamClient, ecr: EcrClient) -> Self {
        Self { iam, ecr }
    }
}

fn provider_error<E>(err: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    ProviderError::new(code, message)
}

#[async_trait]
impl IdentityProvider for AwsIdentityProvider {
    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn create_identity(&self, name: &str, path: &str) -> Result<(), ProviderError> {
        self.iam
            .create_user()
            .user_name(name)
            .path(path)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn attach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.iam
            .attach_user_policy()
            .user_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn create_access_key(&self, name: &str) -> Result<AccessKey, ProviderError> {
        let output = self
            .iam
            .create_access_key()
            .user_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        let key = output.access_key().ok_or_else(|| {
            ProviderError::new("MalformedResponse", "CreateAccessKey returned no access key")
        })?;

        Ok(AccessKey {
            access_key_id: key.access_key_id().to_string(),
            secret_access_key: SecureString::new(key.secret_access_key()),
        })
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn delete_identity(&self, name: &str) -> Result<(), ProviderError> {
        self.iam
            .delete_user()
            .user_name(name)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn list_access_keys(&self, name: &str) -> Result<Vec<String>, ProviderError> {
        let output = self
            .iam
            .list_access_keys()
            .user_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(output
            .access_key_metadata()
            .iter()
            .filter_map(|meta| meta.access_key_id().map(str::to_string))
            .collect())
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn delete_access_key(
        &self,
        name: &str,
        access_key_id: &str,
    ) -> Result<(), ProviderError> {
        self.iam
            .delete_access_key()
            .user_name(name)
            .access_key_id(access_key_id)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    async fn list_attached_policies(&self, name: &str) -> Result<Vec<String>, ProviderError> {
        let output = self
            .iam
            .list_attached_user_policies()
            .user_name(name)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(output
            .attached_policies()
            .iter()
            .filter_map(|policy| policy.policy_arn().map(str::to_string))
            .collect())
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn detach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.iam
            .detach_user_policy()
            .user_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(provider_error)?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = "aws"))]
    async fn exchange_token(&self) -> Result<Vec<AuthorizationData>, ProviderError> {
        let output = self
            .ecr
            .get_authorization_token()
            .send()
            .await
            .map_err(provider_error)?;

        Ok(output
            .authorization_data()
            .iter()
            .filter_map(|data| {
                let token = data.authorization_token()?;
                let endpoint = data.proxy_endpoint()?;
                let expires_at = data.expires_at().and_then(|t| {
                    DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos())
                });
                Some(AuthorizationData {
                    authorization_token: SecureString::new(token),
                    proxy_endpoint: endpoint.to_string(),
                    expires_at,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert!(AwsProviderConfig::default().validate().is_ok());

        let bad = AwsProviderConfig {
            endpoint_url: Some("localhost:4566".into()),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let local = AwsProviderConfig {
            region: Some("us-east-1".into()),
            endpoint_url: Some("http://127.0.0.1:4566".into()),
        };
        assert!(local.validate().is_ok());
    }
}
