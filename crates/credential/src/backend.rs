//! Backend façade
//!
//! [`EcrBackend`] wires configuration and collaborators together and exposes
//! every caller-facing operation.

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, ConfigError, LeaseConfig, RootConfig, ValidatedConfig};
use crate::core::{CredentialError, IssuedSecret, RequestContext, SECRET_ACCESS_KEY_TYPE};
use crate::issue::{IssueFailure, IssueRequest, Issuer};
use crate::lifecycle;
use crate::providers::{StorageWal, StoredLeaseResolver};
use crate::rollback::{self, Reconciler, SweepReport};
use crate::token::{self, RegistryToken, TokenTtlPolicy};
use crate::traits::{IdentityProvider, LeaseResolver, Storage, WriteAheadLog, put_json};

struct Inner {
    config: BackendConfig,
    storage: Arc<dyn Storage>,
    wal: Arc<dyn WriteAheadLog>,
    provider: Arc<dyn IdentityProvider>,
    leases: Arc<dyn LeaseResolver>,
}

/// Dynamic IAM user backend
///
/// Cheap to clone; clones share collaborators.
///
/// # Examples
///
/// ```rust,ignore
/// use ecr_credential::prelude::*;
/// use ecr_credential::testing::MockIdentityProvider;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = EcrBackend::builder()
///     .storage(Arc::new(MemoryStorage::new()))
///     .provider(Arc::new(MockIdentityProvider::new()))
///     .build()?;
///
/// let request = IssueRequest::new("alice", Role::new("readers", RegistryPermission::Read));
/// let secret = backend.issue(&RequestContext::new(), &request).await?;
/// backend.revoke(&RequestContext::new(), &secret.internal_data()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EcrBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EcrBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcrBackend")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl EcrBackend {
    /// Create builder for constructing a backend
    pub fn builder() -> EcrBackendBuilder<No, No> {
        EcrBackendBuilder::new()
    }

    /// Backend configuration
    pub fn config(&self) -> &BackendConfig {
        &self.inner.config
    }

    fn issuer(&self) -> Issuer<'_> {
        Issuer {
            config: &self.inner.config,
            storage: self.inner.storage.as_ref(),
            wal: self.inner.wal.as_ref(),
            provider: self.inner.provider.as_ref(),
            leases: self.inner.leases.as_ref(),
        }
    }

    /// Issue an access key for a freshly created IAM user
    ///
    /// On failure after the user was created, the returned
    /// [`IssueFailure::partial`] names what was left for the reconciler.
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        request: &IssueRequest,
    ) -> Result<IssuedSecret, IssueFailure> {
        let secret = self.issuer().issue(ctx, request).await?;
        tracing::info!(
            trace_id = %ctx.trace_id,
            secret_type = SECRET_ACCESS_KEY_TYPE,
            username = %secret.username,
            access_key_id = %secret.access_key_id,
            ttl_secs = secret.ttl.as_secs(),
            "Issued access key"
        );
        Ok(secret)
    }

    /// Extend a secret's TTL, never past its max TTL
    pub async fn renew(
        &self,
        ctx: &RequestContext,
        secret: &mut IssuedSecret,
        increment: Option<Duration>,
    ) -> Result<Duration, CredentialError> {
        lifecycle::renew(
            ctx,
            self.inner.leases.as_ref(),
            self.inner.storage.as_ref(),
            secret,
            increment,
        )
        .await
    }

    /// Revoke a secret by deleting its IAM user
    #[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id))]
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        internal: &Map<String, Value>,
    ) -> Result<(), CredentialError> {
        if ctx.is_cancelled() {
            return Err(CredentialError::Cancelled);
        }
        lifecycle::revoke(self.inner.provider.as_ref(), internal).await
    }

    /// Exchange the backend's identity for a registry token
    ///
    /// `lease_ttl` is reported instead of the upstream expiry when the
    /// backend is configured with [`TokenTtlPolicy::Lease`].
    #[tracing::instrument(skip_all, fields(trace_id = %ctx.trace_id))]
    pub async fn registry_token(
        &self,
        ctx: &RequestContext,
        lease_ttl: Option<Duration>,
    ) -> Result<RegistryToken, CredentialError> {
        let root = self.read_root_config().await?;
        let policy = root.token_retry(&self.inner.config.token_retry)?;

        let token = token::exchange_token(self.inner.provider.as_ref(), &policy, ctx).await?;
        Ok(match self.inner.config.token_ttl {
            TokenTtlPolicy::Upstream => token,
            TokenTtlPolicy::Lease => token.with_ttl(lease_ttl),
        })
    }

    /// Replay pending WAL entries older than the configured `min_age`
    pub async fn rollback_sweep(
        &self,
        ctx: &RequestContext,
    ) -> Result<SweepReport, CredentialError> {
        rollback::rollback_sweep(
            self.inner.wal.as_ref(),
            self.inner.provider.as_ref(),
            self.inner.config.reconcile.min_age,
            ctx,
        )
        .await
    }

    /// Start the periodic WAL reconciler
    pub fn spawn_reconciler(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        Reconciler::new(
            self.inner.wal.clone(),
            self.inner.provider.clone(),
            self.inner.config.reconcile,
        )
        .spawn(shutdown)
    }

    /// Read the stored root configuration, defaulting when absent
    pub async fn read_root_config(&self) -> Result<RootConfig, CredentialError> {
        self.issuer().root_config().await
    }

    /// Store the root configuration
    ///
    /// A non-empty template is parsed and the retry override checked first,
    /// so a broken document is rejected here rather than on the next use.
    pub async fn write_root_config(&self, config: &RootConfig) -> Result<(), CredentialError> {
        config.token_retry(&self.inner.config.token_retry)?;
        if !config.username_template.is_empty() {
            crate::username::UsernameTemplate::new(&config.username_template).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "username_template".into(),
                    reason: e.to_string(),
                }
            })?;
        }
        put_json(
            self.inner.storage.as_ref(),
            &self.inner.config.root_config_key,
            config,
        )
        .await
        .map_err(|e| CredentialError::durability("config write", e))
    }

    /// Read the stored lease configuration, defaulting when absent
    pub async fn read_lease_config(&self) -> Result<LeaseConfig, CredentialError> {
        Ok(StoredLeaseResolver::new(&self.inner.config.lease_config_key)
            .load(self.inner.storage.as_ref())
            .await?)
    }

    /// Validate and store the lease configuration
    pub async fn write_lease_config(&self, config: &LeaseConfig) -> Result<(), CredentialError> {
        config.validate()?;
        put_json(
            self.inner.storage.as_ref(),
            &self.inner.config.lease_config_key,
            config,
        )
        .await
        .map_err(|e| CredentialError::durability("config write", e))
    }
}

// Type-level markers for builder typestate pattern
#[doc(hidden)]
pub struct No;

/// Builder for [`EcrBackend`] with typestate pattern
///
/// Storage and identity provider are required at compile time. The WAL
/// defaults to [`StorageWal`] over the same storage, and the lease resolver
/// to [`StoredLeaseResolver`] reading `lease_config_key`.
pub struct EcrBackendBuilder<S, P> {
    storage: S,
    provider: P,
    config: BackendConfig,
    wal: Option<Arc<dyn WriteAheadLog>>,
    leases: Option<Arc<dyn LeaseResolver>>,
}

impl EcrBackendBuilder<No, No> {
    /// Create new builder instance
    pub fn new() -> Self {
        Self {
            storage: No,
            provider: No,
            config: BackendConfig::default(),
            wal: None,
            leases: None,
        }
    }
}

impl Default for EcrBackendBuilder<No, No> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EcrBackendBuilder<No, P> {
    /// Set storage (required)
    pub fn storage(self, storage: Arc<dyn Storage>) -> EcrBackendBuilder<Arc<dyn Storage>, P> {
        EcrBackendBuilder {
            storage,
            provider: self.provider,
            config: self.config,
            wal: self.wal,
            leases: self.leases,
        }
    }
}

impl<S> EcrBackendBuilder<S, No> {
    /// Set identity provider (required)
    pub fn provider(
        self,
        provider: Arc<dyn IdentityProvider>,
    ) -> EcrBackendBuilder<S, Arc<dyn IdentityProvider>> {
        EcrBackendBuilder {
            storage: self.storage,
            provider,
            config: self.config,
            wal: self.wal,
            leases: self.leases,
        }
    }
}

impl<S, P> EcrBackendBuilder<S, P> {
    /// Set backend configuration (optional)
    pub fn config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a dedicated write-ahead log (optional)
    pub fn wal(mut self, wal: Arc<dyn WriteAheadLog>) -> Self {
        self.wal = Some(wal);
        self
    }

    /// Use a custom lease resolver (optional)
    pub fn lease_resolver(mut self, leases: Arc<dyn LeaseResolver>) -> Self {
        self.leases = Some(leases);
        self
    }
}

impl EcrBackendBuilder<Arc<dyn Storage>, Arc<dyn IdentityProvider>> {
    /// Validate the configuration and build the backend
    pub fn build(self) -> Result<EcrBackend, ConfigError> {
        self.config.validate()?;

        let wal = self
            .wal
            .unwrap_or_else(|| Arc::new(StorageWal::new(self.storage.clone())));
        let leases = self.leases.unwrap_or_else(|| {
            Arc::new(StoredLeaseResolver::new(&self.config.lease_config_key))
        });

        tracing::debug!(
            component = self.config.component_name(),
            user_path = ?self.config.user_path,
            token_ttl = ?self.config.token_ttl,
            "Built backend"
        );

        Ok(EcrBackend {
            inner: Arc::new(Inner {
                config: self.config,
                storage: self.storage,
                wal,
                provider: self.provider,
                leases,
            }),
        })
    }
}
