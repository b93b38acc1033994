//! Registry token exchange
//!
//! Exchanges the caller's held identity for a short-lived container
//! registry authentication token. The token is read-through: it is never
//! persisted and never leased.

mod retry;

pub use retry::{INVALID_TOKEN_CODE, INVALID_TOKEN_MESSAGE, TokenRetryPolicy, exchange_with_retry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

use crate::core::{CredentialError, ProviderError, RequestContext, SecureString};
use crate::traits::IdentityProvider;

/// Which TTL a registry token response reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTtlPolicy {
    /// Time left until the upstream token expires
    #[default]
    Upstream,
    /// The caller's secret lease TTL
    Lease,
}

/// Registry authentication token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryToken {
    /// Base64 `user:password` token
    pub auth_token: SecureString,

    /// Registry endpoint the token is valid for
    pub registry_url: String,

    /// Remaining validity, `None` if unknown
    pub ttl: Option<Duration>,
}

impl RegistryToken {
    /// Response payload: `auth_token`, `registry_url` and, when known, `ttl` in seconds
    pub fn to_response_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("auth_token".into(), json!(self.auth_token.expose()));
        data.insert("registry_url".into(), json!(self.registry_url));
        if let Some(ttl) = self.ttl {
            data.insert("ttl".into(), json!(ttl.as_secs()));
        }
        data
    }

    /// Replace the reported TTL
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }
}

fn remaining(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    expires_at.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Exchange the client's identity for a registry token
///
/// Retries the transient token-invalidity error per `policy`; see
/// [`exchange_with_retry`]. Only the first authorization entry is used.
pub async fn exchange_token(
    client: &dyn IdentityProvider,
    policy: &TokenRetryPolicy,
    ctx: &RequestContext,
) -> Result<RegistryToken, CredentialError> {
    let data = exchange_with_retry(client, policy, ctx).await?;

    let Some(first) = data.into_iter().next() else {
        return Err(CredentialError::remote(
            "get_authorization_token",
            ProviderError::new("EmptyResponse", "no authorization data returned"),
        ));
    };

    Ok(RegistryToken {
        auth_token: first.authorization_token,
        registry_url: first.proxy_endpoint,
        ttl: remaining(first.expires_at, Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockIdentityProvider;
    use crate::traits::AuthorizationData;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn transient() -> ProviderError {
        ProviderError::new(INVALID_TOKEN_CODE, INVALID_TOKEN_MESSAGE)
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 3)]
    #[case(3, 30)]
    #[case(30, 30)]
    #[tokio::test]
    async fn test_transient_failures_then_success(#[case] failures: usize, #[case] max_retries: u32) {
        let client = MockIdentityProvider::new();
        client.fail_token_exchange(vec![transient(); failures]);

        let token = exchange_token(
            &client,
            &TokenRetryPolicy::with_max_retries(max_retries),
            &RequestContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(client.token_calls(), failures + 1);
        assert_eq!(token.registry_url, MockIdentityProvider::REGISTRY_URL);
    }

    #[rstest]
    #[case(4, 3)]
    #[case(1, 0)]
    #[case(40, 30)]
    #[tokio::test]
    async fn test_retries_exhausted(#[case] failures: usize, #[case] max_retries: u32) {
        let client = MockIdentityProvider::new();
        client.fail_token_exchange(vec![transient(); failures]);

        let err = exchange_token(
            &client,
            &TokenRetryPolicy::with_max_retries(max_retries),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

        match err {
            CredentialError::TransientUpstream { attempts, source } => {
                assert_eq!(attempts, max_retries + 1);
                assert_eq!(source, transient());
            }
            other => panic!("expected TransientUpstream, got {other:?}"),
        }
        assert_eq!(client.token_calls(), max_retries as usize + 1);
    }

    #[tokio::test]
    async fn test_other_error_is_not_retried() {
        let client = MockIdentityProvider::new();
        client.fail_token_exchange(vec![ProviderError::new("AccessDeniedException", "denied")]);

        let err = exchange_token(&client, &TokenRetryPolicy::default(), &RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Remote { .. }));
        assert_eq!(client.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_authorization_list() {
        let client = MockIdentityProvider::new().with_authorization_data(Vec::new());

        let err = exchange_token(&client, &TokenRetryPolicy::default(), &RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Remote { .. }));
    }

    #[tokio::test]
    async fn test_first_entry_wins() {
        let expires = Utc::now() + chrono::Duration::hours(12);
        let client = MockIdentityProvider::new().with_authorization_data(vec![
            AuthorizationData {
                authorization_token: SecureString::new("first"),
                proxy_endpoint: "https://one.example".into(),
                expires_at: Some(expires),
            },
            AuthorizationData {
                authorization_token: SecureString::new("second"),
                proxy_endpoint: "https://two.example".into(),
                expires_at: None,
            },
        ]);

        let token = exchange_token(&client, &TokenRetryPolicy::default(), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(token.auth_token.expose(), "first");
        assert_eq!(token.registry_url, "https://one.example");
        let ttl = token.ttl.unwrap();
        assert!(ttl <= Duration::from_secs(12 * 3600));
        assert!(ttl > Duration::from_secs(11 * 3600));
    }

    #[test]
    fn test_remaining_saturates() {
        let now = Utc::now();
        assert_eq!(
            remaining(Some(now - chrono::Duration::seconds(5)), now),
            Some(Duration::ZERO)
        );
        assert_eq!(remaining(None, now), None);
    }

    #[test]
    fn test_response_data() {
        let token = RegistryToken {
            auth_token: SecureString::new("QVdTOnRva2Vu"),
            registry_url: "https://123456789012.dkr.ecr.us-east-1.amazonaws.com".into(),
            ttl: Some(Duration::from_secs(43200)),
        };
        let data = token.to_response_data();
        assert_eq!(data["auth_token"], "QVdTOnRva2Vu");
        assert_eq!(data["ttl"], 43200);

        let data = token.with_ttl(None).to_response_data();
        assert!(!data.contains_key("ttl"));
    }
}
