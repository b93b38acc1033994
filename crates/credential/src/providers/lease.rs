//! Lease resolution from the stored lease configuration

use async_trait::async_trait;
use std::time::Duration;

use crate::config::{LEASE_CONFIG_KEY, LeaseConfig, ValidatedConfig};
use crate::core::{LeaseError, RequestContext};
use crate::traits::{Lease, LeaseResolver, Storage, get_json};

/// Reads [`LeaseConfig`] from storage on every resolution
///
/// A missing document resolves to the zero lease. A requested TTL replaces
/// the configured default but never exceeds `lease_max`.
#[derive(Debug, Clone)]
pub struct StoredLeaseResolver {
    key: String,
}

impl StoredLeaseResolver {
    /// Resolver reading from the given storage key
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Load the stored lease configuration
    pub async fn load(&self, storage: &dyn Storage) -> Result<LeaseConfig, LeaseError> {
        let config: LeaseConfig = get_json(storage, &self.key).await?.unwrap_or_default();
        config
            .validate()
            .map_err(|e| LeaseError::Invalid(e.to_string()))?;
        Ok(config)
    }
}

impl Default for StoredLeaseResolver {
    fn default() -> Self {
        Self::new(LEASE_CONFIG_KEY)
    }
}

#[async_trait]
impl LeaseResolver for StoredLeaseResolver {
    async fn resolve(
        &self,
        ctx: &RequestContext,
        storage: &dyn Storage,
        requested: Option<Duration>,
    ) -> Result<Lease, LeaseError> {
        let config = self.load(storage).await?;

        let ttl = match requested {
            Some(requested) if !config.lease_max.is_zero() => requested.min(config.lease_max),
            Some(requested) => requested,
            None => config.lease,
        };

        tracing::debug!(
            trace_id = %ctx.trace_id,
            ttl_secs = ttl.as_secs(),
            max_ttl_secs = config.lease_max.as_secs(),
            "Resolved lease"
        );

        Ok(Lease::new(ttl, config.lease_max))
    }
}
