use async_trait::async_trait;
use std::time::Duration;

use crate::core::{LeaseError, RequestContext};

use super::Storage;

/// TTL pair attached to an issued secret
///
/// Zero durations mean "use the system defaults".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lease {
    /// Time to live
    pub ttl: Duration,
    /// Maximum lifetime
    pub max_ttl: Duration,
}

impl Lease {
    /// Create a lease
    pub fn new(ttl: Duration, max_ttl: Duration) -> Self {
        Self { ttl, max_ttl }
    }
}

/// Computes the lease for a secret from stored configuration
#[async_trait]
pub trait LeaseResolver: Send + Sync {
    /// Resolve the lease, optionally honoring a caller-requested TTL
    async fn resolve(
        &self,
        ctx: &RequestContext,
        storage: &dyn Storage,
        requested: Option<Duration>,
    ) -> Result<Lease, LeaseError>;
}
