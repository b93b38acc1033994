//! Idempotent identity teardown

use crate::core::{CredentialError, ProviderError};
use crate::traits::IdentityProvider;

fn absent_ok<T: Default>(result: Result<T, ProviderError>) -> Result<T, ProviderError> {
    match result {
        Err(e) if e.is_not_found() => Ok(T::default()),
        other => other,
    }
}

/// Delete an IAM user and everything that blocks its deletion
///
/// Access keys are deleted and managed policies detached before the user
/// itself. A target that is already gone at any step counts as success, so
/// the call can be repeated safely.
#[tracing::instrument(skip(provider))]
pub async fn delete_user(
    provider: &dyn IdentityProvider,
    username: &str,
) -> Result<(), CredentialError> {
    let keys = match provider.list_access_keys(username).await {
        Ok(keys) => keys,
        Err(e) if e.is_not_found() => {
            tracing::debug!(username, "User already absent");
            return Ok(());
        }
        Err(e) => return Err(CredentialError::remote("list_access_keys", e)),
    };

    for key in &keys {
        absent_ok(provider.delete_access_key(username, key).await)
            .map_err(|e| CredentialError::remote("delete_access_key", e))?;
    }

    let policies = absent_ok(provider.list_attached_policies(username).await)
        .map_err(|e| CredentialError::remote("list_attached_user_policies", e))?;

    for arn in &policies {
        absent_ok(provider.detach_policy(username, arn).await)
            .map_err(|e| CredentialError::remote("detach_user_policy", e))?;
    }

    absent_ok(provider.delete_identity(username).await)
        .map_err(|e| CredentialError::remote("delete_user", e))?;

    tracing::info!(
        username,
        access_keys = keys.len(),
        policies = policies.len(),
        "Deleted IAM user"
    );
    Ok(())
}
