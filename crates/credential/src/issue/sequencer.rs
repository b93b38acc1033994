//! WAL-protected issuance sequence
//!
//! The intent record is written before the first remote mutation and
//! removed only once the access key exists and the lease is known. A crash
//! anywhere in between leaves the record behind for the reconciler.

use std::time::Duration;

use chrono::Utc;

use crate::config::{BackendConfig, ConfigError, RootConfig};
use crate::core::{CredentialError, IssuedSecret, RequestContext, Role, StorageError, WalId};
use crate::lifecycle::attach_lease;
use crate::traits::{IdentityProvider, LeaseResolver, Storage, WriteAheadLog, get_json};
use crate::username::generate_username;

use super::intent::WalIntent;
use super::state::IssueState;

/// Parameters of one issuance
#[derive(Debug, Clone)]
pub struct IssueRequest {
    /// Caller display name, fed into the username template
    pub display_name: String,

    /// Role name, fed into the username template as `.PolicyName`
    pub policy_name: String,

    /// Role the secret is issued for
    pub role: Role,

    /// TTL requested by the caller, clamped by the lease resolver
    pub requested_ttl: Option<Duration>,
}

impl IssueRequest {
    /// Request using the role's name as the policy name
    pub fn new(display_name: impl Into<String>, role: Role) -> Self {
        Self {
            display_name: display_name.into(),
            policy_name: role.name.clone(),
            role,
            requested_ttl: None,
        }
    }

    /// Override the policy name (builder pattern)
    pub fn with_policy_name(mut self, policy_name: impl Into<String>) -> Self {
        self.policy_name = policy_name.into();
        self
    }

    /// Request a specific TTL (builder pattern)
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.requested_ttl = Some(ttl);
        self
    }
}

/// Remote state left behind by a failed issuance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialIssue {
    /// Identity that may exist remotely
    pub username: String,

    /// WAL entry still referencing it
    pub wal_id: WalId,

    /// Last state reached
    pub state: IssueState,

    /// Access key minted before the failure, if any
    pub access_key_id: Option<String>,
}

/// Issuance failure with whatever was left behind
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct IssueFailure {
    /// What went wrong
    #[source]
    pub error: CredentialError,

    /// Remote state left for the reconciler; `None` when nothing remains
    pub partial: Option<PartialIssue>,
}

impl IssueFailure {
    fn clean(error: impl Into<CredentialError>) -> Self {
        Self {
            error: error.into(),
            partial: None,
        }
    }

    fn partial(error: CredentialError, partial: PartialIssue) -> Self {
        Self {
            error,
            partial: Some(partial),
        }
    }
}

impl From<IssueFailure> for CredentialError {
    fn from(failure: IssueFailure) -> Self {
        failure.error
    }
}

/// Tracks one issuance through its states
#[derive(Debug)]
struct Progress {
    username: String,
    wal_id: WalId,
    state: IssueState,
    access_key_id: Option<String>,
}

impl Progress {
    fn advance(&mut self, next: IssueState, trace_id: &uuid::Uuid) {
        debug_assert!(self.state.can_transition_to(next));
        tracing::info!(
            trace_id = %trace_id,
            username = %self.username,
            from = %self.state,
            to = %next,
            "Issuance state transition"
        );
        self.state = next;
    }

    fn fail(&self, error: CredentialError, trace_id: &uuid::Uuid) -> IssueFailure {
        tracing::warn!(
            trace_id = %trace_id,
            username = %self.username,
            wal_id = %self.wal_id,
            state = %self.state,
            remote_identity = self.state.has_remote_identity(),
            error = %error,
            "Issuance failed; WAL entry left for the reconciler"
        );
        IssueFailure::partial(
            error,
            PartialIssue {
                username: self.username.clone(),
                wal_id: self.wal_id.clone(),
                state: self.state,
                access_key_id: self.access_key_id.clone(),
            },
        )
    }
}

/// Collaborators the sequence runs against
pub struct Issuer<'a> {
    /// Backend configuration
    pub config: &'a BackendConfig,
    /// Key/value storage holding the root and lease configuration
    pub storage: &'a dyn Storage,
    /// Write-ahead log
    pub wal: &'a dyn WriteAheadLog,
    /// Identity provider
    pub provider: &'a dyn IdentityProvider,
    /// Lease resolver
    pub leases: &'a dyn LeaseResolver,
}

impl Issuer<'_> {
    /// Read the root configuration document, defaulting when absent
    pub async fn root_config(&self) -> Result<RootConfig, CredentialError> {
        get_json(self.storage, &self.config.root_config_key)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| match e {
                StorageError::Decode { .. } => ConfigError::Unreadable(e.to_string()).into(),
                other => CredentialError::durability("config read", other),
            })
    }

    /// Run the full issuance sequence
    #[tracing::instrument(
        skip(self, ctx, request),
        fields(trace_id = %ctx.trace_id, role = %request.role.name)
    )]
    pub async fn issue(
        &self,
        ctx: &RequestContext,
        request: &IssueRequest,
    ) -> Result<IssuedSecret, IssueFailure> {
        if ctx.is_cancelled() {
            return Err(IssueFailure::clean(CredentialError::Cancelled));
        }

        // Init → WalWritten
        let root = self.root_config().await.map_err(IssueFailure::clean)?;
        let username = generate_username(
            &request.display_name,
            &request.policy_name,
            root.effective_template(),
        )
        .map_err(IssueFailure::clean)?;

        let intent = WalIntent::pending_user(&username);
        let payload = intent.to_value().map_err(|source| {
            IssueFailure::clean(CredentialError::durability(
                "wal write",
                StorageError::Encode {
                    key: intent.kind().to_string(),
                    source,
                },
            ))
        })?;
        let wal_id = self
            .wal
            .put_wal(intent.kind(), payload)
            .await
            .map_err(|e| IssueFailure::clean(CredentialError::durability("wal write", e)))?;

        let mut progress = Progress {
            username,
            wal_id,
            state: IssueState::Init,
            access_key_id: None,
        };
        progress.advance(IssueState::WalWritten, &ctx.trace_id);

        // WalWritten → IdentityCreated
        let path = self.config.user_path.path_for(&progress.username);
        if let Err(source) = self.provider.create_identity(&progress.username, &path).await {
            return Err(self.abandon_wal(ctx, &mut progress, source).await);
        }
        progress.advance(IssueState::IdentityCreated, &ctx.trace_id);

        // IdentityCreated → PolicyAttached
        match self.config.policies.arn_for(&request.role.registry_permission) {
            Some(arn) => {
                if let Err(e) = self.provider.attach_policy(&progress.username, arn).await {
                    let error = CredentialError::remote("attach_user_policy", e);
                    return Err(progress.fail(error, &ctx.trace_id));
                }
            }
            None => tracing::info!(
                trace_id = %ctx.trace_id,
                username = %progress.username,
                permission = %request.role.registry_permission,
                "No managed policy for registry permission; identity left without one"
            ),
        }
        progress.advance(IssueState::PolicyAttached, &ctx.trace_id);

        // PolicyAttached → KeyCreated
        let key = match self.provider.create_access_key(&progress.username).await {
            Ok(key) => key,
            Err(e) => {
                let error = CredentialError::remote("create_access_key", e);
                return Err(progress.fail(error, &ctx.trace_id));
            }
        };
        progress.access_key_id = Some(key.access_key_id.clone());
        progress.advance(IssueState::KeyCreated, &ctx.trace_id);

        // Lease is resolved while the WAL entry still protects the identity
        let lease = match self
            .leases
            .resolve(ctx, self.storage, request.requested_ttl)
            .await
        {
            Ok(lease) => lease,
            Err(e) => return Err(progress.fail(e.into(), &ctx.trace_id)),
        };

        // KeyCreated → Committed
        if let Err(e) = self.wal.delete_wal(&progress.wal_id).await {
            let error = CredentialError::durability("wal commit", e);
            return Err(progress.fail(error, &ctx.trace_id));
        }
        progress.advance(IssueState::Committed, &ctx.trace_id);

        let mut secret = IssuedSecret {
            access_key_id: key.access_key_id,
            secret_access_key: key.secret_access_key,
            username: progress.username,
            role: request.role.clone(),
            ttl: Duration::ZERO,
            max_ttl: Duration::ZERO,
            issued_at: Utc::now(),
        };
        attach_lease(&mut secret, lease);
        Ok(secret)
    }

    async fn abandon_wal(
        &self,
        ctx: &RequestContext,
        progress: &mut Progress,
        source: crate::core::ProviderError,
    ) -> IssueFailure {
        match self.wal.delete_wal(&progress.wal_id).await {
            Ok(()) => {
                progress.advance(IssueState::RolledBack, &ctx.trace_id);
                IssueFailure::clean(CredentialError::remote("create_user", source))
            }
            Err(wal) => {
                tracing::error!(
                    trace_id = %ctx.trace_id,
                    username = %progress.username,
                    wal_id = %progress.wal_id,
                    error = %wal,
                    "Failed to delete WAL entry after identity creation failed"
                );
                progress.fail(CredentialError::WalCleanupFailed { source, wal }, &ctx.trace_id)
            }
        }
    }
}
