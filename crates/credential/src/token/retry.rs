//! Bounded retry for the registry token exchange
//!
//! Freshly issued IAM credentials take a while to propagate; until they do,
//! the token service rejects them with one specific error. That error is
//! retried immediately (no backoff) up to a fixed cap; anything else is
//! surfaced on the first occurrence.

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ValidatedConfig};
use crate::core::{CredentialError, ProviderError, RequestContext};
use crate::traits::{AuthorizationData, IdentityProvider};

/// Error code of the token-invalidity error
pub const INVALID_TOKEN_CODE: &str = "UnrecognizedClientException";
/// Error message of the token-invalidity error
pub const INVALID_TOKEN_MESSAGE: &str = "The security token included in the request is invalid.";

/// Retry policy for the token exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenRetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Provider error code that is retried
    pub transient_code: String,

    /// Provider error message that is retried
    pub transient_message: String,
}

impl Default for TokenRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 30,
            transient_code: INVALID_TOKEN_CODE.into(),
            transient_message: INVALID_TOKEN_MESSAGE.into(),
        }
    }
}

impl TokenRetryPolicy {
    /// Policy with a custom retry cap and the default error signature
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Whether `err` is the transient token-invalidity error
    pub fn is_transient(&self, err: &ProviderError) -> bool {
        err.matches(&self.transient_code, &self.transient_message)
    }
}

impl ValidatedConfig for TokenRetryPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.transient_code.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "token_retry.transient_code".into(),
            });
        }
        if self.max_retries > 1000 {
            return Err(ConfigError::InvalidValue {
                field: "token_retry.max_retries".into(),
                reason: format!("{} exceeds 1000", self.max_retries),
            });
        }
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "token-retry"
    }
}

/// Call the token exchange, retrying the transient error
///
/// Cancellation of `ctx` is honored before every attempt and while an
/// attempt is in flight.
pub async fn exchange_with_retry(
    client: &dyn IdentityProvider,
    policy: &TokenRetryPolicy,
    ctx: &RequestContext,
) -> Result<Vec<AuthorizationData>, CredentialError> {
    let total = policy.max_retries.saturating_add(1);
    let mut attempt: u32 = 0;

    loop {
        if ctx.is_cancelled() {
            return Err(CredentialError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(CredentialError::Cancelled),
            result = client.exchange_token() => result,
        };

        match result {
            Ok(data) => return Ok(data),
            Err(err) if policy.is_transient(&err) => {
                if attempt >= total {
                    tracing::warn!(
                        trace_id = %ctx.trace_id,
                        attempts = attempt,
                        error = %err,
                        "Registry token exchange still rejected after all retries"
                    );
                    return Err(CredentialError::TransientUpstream {
                        attempts: attempt,
                        source: err,
                    });
                }
                tracing::info!(
                    trace_id = %ctx.trace_id,
                    attempt,
                    max_attempts = total,
                    "Retrying registry token exchange: credentials not yet propagated"
                );
            }
            Err(err) => return Err(CredentialError::remote("get_authorization_token", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockIdentityProvider;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn transient() -> ProviderError {
        ProviderError::new(INVALID_TOKEN_CODE, INVALID_TOKEN_MESSAGE)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let client = MockIdentityProvider::new();
        let data = exchange_with_retry(&client, &TokenRetryPolicy::default(), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(client.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_same_code_different_message_is_not_retried() {
        let client = MockIdentityProvider::new();
        client.fail_token_exchange(vec![ProviderError::new(INVALID_TOKEN_CODE, "other")]);

        let err = exchange_with_retry(&client, &TokenRetryPolicy::default(), &RequestContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Remote { .. }));
        assert_eq!(client.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_means_single_attempt() {
        let client = MockIdentityProvider::new();
        client.fail_token_exchange(vec![transient()]);

        let err = exchange_with_retry(
            &client,
            &TokenRetryPolicy::with_max_retries(0),
            &RequestContext::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CredentialError::TransientUpstream { attempts: 1, .. }));
        assert_eq!(client.token_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let client = MockIdentityProvider::new();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::new().with_cancellation(token);

        let err = exchange_with_retry(&client, &TokenRetryPolicy::default(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, CredentialError::Cancelled));
        assert_eq!(client.token_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_attempt() {
        let client = MockIdentityProvider::new().with_token_delay(Duration::from_secs(60));
        let token = CancellationToken::new();
        let ctx = RequestContext::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let err = exchange_with_retry(&client, &TokenRetryPolicy::default(), &ctx)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, CredentialError::Cancelled));
        assert_eq!(client.token_calls(), 1);
    }
}
