//! Secret lifecycle: lease binding, renewal and revocation

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::core::{CredentialError, IssuedSecret, RequestContext, internal_username};
use crate::rollback::delete_user;
use crate::traits::{IdentityProvider, Lease, LeaseResolver, Storage};

/// Set a secret's TTL and max TTL
pub fn attach_lease(secret: &mut IssuedSecret, lease: Lease) {
    secret.ttl = lease.ttl;
    secret.max_ttl = lease.max_ttl;
}

/// Resolve the lease for a new or renewed secret
pub async fn resolve_lease(
    ctx: &RequestContext,
    resolver: &dyn LeaseResolver,
    storage: &dyn Storage,
    requested: Option<Duration>,
) -> Result<Lease, CredentialError> {
    Ok(resolver.resolve(ctx, storage, requested).await?)
}

/// Compute the TTL granted on renewal at `now`
///
/// The result never reaches past `issued_at + max_ttl`. A zero resolved TTL
/// ("system default") is replaced by the remaining lifetime when the secret
/// has one.
pub fn extend(
    secret: &IssuedSecret,
    resolved: Lease,
    now: DateTime<Utc>,
) -> Result<Duration, CredentialError> {
    let Some(max_expiry) = secret.max_expiry() else {
        return Ok(resolved.ttl);
    };

    let remaining = (max_expiry - now).to_std().unwrap_or(Duration::ZERO);
    if remaining.is_zero() {
        return Err(CredentialError::LeaseExpired {
            max_ttl: secret.max_ttl,
        });
    }

    if resolved.ttl.is_zero() {
        Ok(remaining)
    } else {
        Ok(resolved.ttl.min(remaining))
    }
}

/// Renew a secret's lease
///
/// Re-resolves the lease with `increment` as the requested TTL and updates
/// `secret.ttl` in place. The secret's max TTL is fixed at issuance.
#[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id, username = %secret.username))]
pub async fn renew(
    ctx: &RequestContext,
    resolver: &dyn LeaseResolver,
    storage: &dyn Storage,
    secret: &mut IssuedSecret,
    increment: Option<Duration>,
) -> Result<Duration, CredentialError> {
    let resolved = resolve_lease(ctx, resolver, storage, increment).await?;
    let ttl = extend(secret, resolved, Utc::now())?;
    secret.ttl = ttl;

    tracing::info!(ttl_secs = ttl.as_secs(), "Renewed secret lease");
    Ok(ttl)
}

/// Revoke a secret by deleting its IAM user
///
/// The username is taken from the secret's internal data only; a missing or
/// non-string value is rejected before any remote call.
pub async fn revoke(
    provider: &dyn IdentityProvider,
    internal: &Map<String, Value>,
) -> Result<(), CredentialError> {
    let username = internal_username(internal)
        .ok_or_else(|| CredentialError::data_integrity("secret is missing username internal data"))?;

    delete_user(provider, username).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, RegistryPermission, Role, SecureString};
    use crate::testing::{FixedLeaseResolver, MockIdentityProvider, MockStorage};
    use rstest::rstest;
    use serde_json::json;

    fn secret(max_ttl: u64, issued_secs_ago: i64) -> IssuedSecret {
        IssuedSecret {
            access_key_id: "AKIAEXAMPLE".into(),
            secret_access_key: SecureString::new("s3cr3t"),
            username: "vault-carol".into(),
            role: Role::new("pull", RegistryPermission::Read),
            ttl: Duration::from_secs(600),
            max_ttl: Duration::from_secs(max_ttl),
            issued_at: Utc::now() - chrono::Duration::seconds(issued_secs_ago),
        }
    }

    fn lease(ttl: u64) -> Lease {
        Lease::new(Duration::from_secs(ttl), Duration::from_secs(3600))
    }

    #[rstest]
    #[case::within_max(3600, 0, 600, 600)]
    #[case::capped_by_max(3600, 3300, 600, 300)]
    #[case::unbounded(0, 100_000, 600, 600)]
    #[case::default_ttl_uses_remaining(3600, 3000, 0, 600)]
    fn test_extend(
        #[case] max_ttl: u64,
        #[case] age: i64,
        #[case] resolved: u64,
        #[case] expected: u64,
    ) {
        let s = secret(max_ttl, age);
        let now = s.issued_at + chrono::Duration::seconds(age);
        assert_eq!(
            extend(&s, lease(resolved), now).unwrap(),
            Duration::from_secs(expected)
        );
    }

    #[test]
    fn test_extend_past_max_fails() {
        let s = secret(3600, 0);
        let now = s.issued_at + chrono::Duration::seconds(3600);
        let err = extend(&s, lease(600), now).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lease);
        assert!(matches!(err, CredentialError::LeaseExpired { .. }));
    }

    #[tokio::test]
    async fn test_renew_updates_ttl() {
        let mut s = secret(86400, 60);
        let resolver = FixedLeaseResolver::new(lease(1800));
        let ttl = renew(
            &RequestContext::new(),
            &resolver,
            &MockStorage::new(),
            &mut s,
            None,
        )
        .await
        .unwrap();
        assert_eq!(ttl, Duration::from_secs(1800));
        assert_eq!(s.ttl, ttl);
        assert_eq!(s.max_ttl, Duration::from_secs(86400));
    }

    #[tokio::test]
    async fn test_revoke_without_username_makes_no_call() {
        let provider = MockIdentityProvider::new();
        let mut internal = Map::new();
        internal.insert("access_key".into(), json!("AKIA"));

        let err = revoke(&provider, &internal).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);

        internal.insert("username".into(), json!(7));
        let err = revoke(&provider, &internal).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataIntegrity);

        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_twice() {
        let provider = MockIdentityProvider::new();
        provider.seed_identity("vault-carol", &["arn:aws:iam::aws:policy/A"], 1);
        let internal = secret(0, 0).internal_data();

        revoke(&provider, &internal).await.unwrap();
        revoke(&provider, &internal).await.unwrap();
        assert!(!provider.has_identity("vault-carol"));
    }
}
