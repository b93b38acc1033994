//! WAL replay
//!
//! Pending "user" entries older than a grace period belong to issuances
//! that crashed or failed after writing their intent. Replay deletes the
//! identity they name and then the entry itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ValidatedConfig};
use crate::core::{CredentialError, RequestContext, WalId};
use crate::issue::{USER_WAL_KIND, WalIntent};
use crate::traits::{IdentityProvider, WriteAheadLog};

use super::cleanup::delete_user;

/// Reconciler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Entries younger than this are left alone
    #[serde(with = "humantime_serde")]
    pub min_age: Duration,

    /// Delay between sweeps
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            min_age: Duration::from_secs(10 * 60),
            interval: Duration::from_secs(5 * 60),
        }
    }
}

impl ValidatedConfig for ReconcileConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "reconcile.interval".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    fn component_name(&self) -> &'static str {
        "reconciler"
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pending entries looked at
    pub examined: usize,
    /// Entries left because they are younger than `min_age`
    pub skipped_young: usize,
    /// Entries whose identity was deleted and whose WAL entry was removed
    pub cleaned: usize,
    /// Entries left in place after a decode, cleanup or delete failure
    pub failed: usize,
}

enum Outcome {
    Skipped,
    Young,
    Cleaned,
    Failed,
}

async fn replay_entry(
    wal: &dyn WriteAheadLog,
    provider: &dyn IdentityProvider,
    id: &WalId,
    min_age: Duration,
    now: DateTime<Utc>,
) -> Outcome {
    let entry = match wal.get_wal(id).await {
        Ok(Some(entry)) => entry,
        // Committed between list and get
        Ok(None) => return Outcome::Skipped,
        Err(e) => {
            tracing::error!(wal_id = %id, error = %e, "Failed to read WAL entry");
            return Outcome::Failed;
        }
    };

    if entry.kind != USER_WAL_KIND {
        return Outcome::Skipped;
    }
    if entry.age(now) < min_age {
        return Outcome::Young;
    }

    let intent = match WalIntent::from_value(entry.data) {
        Ok(intent) => intent,
        Err(e) => {
            tracing::error!(wal_id = %id, error = %e, "Undecodable WAL entry left in place");
            return Outcome::Failed;
        }
    };

    if let Err(e) = delete_user(provider, intent.username()).await {
        tracing::error!(
            wal_id = %id,
            username = intent.username(),
            error = %e,
            "WAL rollback failed; will retry on next sweep"
        );
        return Outcome::Failed;
    }

    if let Err(e) = wal.delete_wal(id).await {
        tracing::error!(
            wal_id = %id,
            username = intent.username(),
            error = %e,
            "Identity deleted but WAL entry could not be removed"
        );
        return Outcome::Failed;
    }

    tracing::info!(wal_id = %id, username = intent.username(), "Rolled back abandoned issuance");
    Outcome::Cleaned
}

/// Replay every pending "user" WAL entry, judging age against `now`
pub async fn sweep_at(
    wal: &dyn WriteAheadLog,
    provider: &dyn IdentityProvider,
    min_age: Duration,
    ctx: &RequestContext,
    now: DateTime<Utc>,
) -> Result<SweepReport, CredentialError> {
    let ids = wal
        .list_wal()
        .await
        .map_err(|e| CredentialError::durability("wal list", e))?;

    let mut report = SweepReport::default();
    for id in &ids {
        if ctx.is_cancelled() {
            return Err(CredentialError::Cancelled);
        }
        match replay_entry(wal, provider, id, min_age, now).await {
            Outcome::Skipped => continue,
            Outcome::Young => report.skipped_young += 1,
            Outcome::Cleaned => report.cleaned += 1,
            Outcome::Failed => report.failed += 1,
        }
        report.examined += 1;
    }

    tracing::debug!(
        trace_id = %ctx.trace_id,
        examined = report.examined,
        skipped_young = report.skipped_young,
        cleaned = report.cleaned,
        failed = report.failed,
        "WAL sweep finished"
    );
    Ok(report)
}

/// Replay every pending "user" WAL entry older than `min_age`
pub async fn rollback_sweep(
    wal: &dyn WriteAheadLog,
    provider: &dyn IdentityProvider,
    min_age: Duration,
    ctx: &RequestContext,
) -> Result<SweepReport, CredentialError> {
    sweep_at(wal, provider, min_age, ctx, Utc::now()).await
}

/// Background task sweeping the WAL at a fixed interval
///
/// # Example
///
/// ```rust,ignore
/// let shutdown = CancellationToken::new();
/// let handle = Reconciler::new(wal, provider, ReconcileConfig::default())
///     .spawn(shutdown.clone());
///
/// // ...
/// shutdown.cancel();
/// handle.await?;
/// ```
pub struct Reconciler {
    wal: Arc<dyn WriteAheadLog>,
    provider: Arc<dyn IdentityProvider>,
    config: ReconcileConfig,
}

impl Reconciler {
    /// Create a reconciler
    pub fn new(
        wal: Arc<dyn WriteAheadLog>,
        provider: Arc<dyn IdentityProvider>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            wal,
            provider,
            config,
        }
    }

    /// Sweep every `interval` until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.interval.as_secs(),
            min_age_secs = self.config.min_age.as_secs(),
            "WAL reconciler started"
        );

        loop {
            let next = Instant::now() + self.config.interval;

            tokio::select! {
                _ = sleep_until(next) => {
                    let ctx = RequestContext::new().with_cancellation(shutdown.child_token());
                    let result = rollback_sweep(
                        self.wal.as_ref(),
                        self.provider.as_ref(),
                        self.config.min_age,
                        &ctx,
                    )
                    .await;
                    match result {
                        Ok(report) if report.cleaned > 0 || report.failed > 0 => {
                            tracing::info!(
                                cleaned = report.cleaned,
                                failed = report.failed,
                                "WAL sweep completed"
                            );
                        }
                        Ok(_) => {}
                        Err(CredentialError::Cancelled) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "WAL sweep failed");
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("WAL reconciler shutting down gracefully");
                    return;
                }
            }
        }
    }

    /// Run on a tokio task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryStorage, StorageWal};
    use crate::testing::MockIdentityProvider;
    use serde_json::json;

    fn wal() -> StorageWal {
        StorageWal::new(Arc::new(MemoryStorage::new()))
    }

    async fn pending_user(wal: &StorageWal, username: &str) -> WalId {
        let intent = WalIntent::pending_user(username);
        wal.put_wal(intent.kind(), intent.to_value().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_young_entries_are_skipped() {
        let wal = wal();
        let provider = MockIdentityProvider::new();
        provider.seed_identity("vault-young", &[], 1);
        pending_user(&wal, "vault-young").await;

        let report = rollback_sweep(
            &wal,
            &provider,
            ReconcileConfig::default().min_age,
            &RequestContext::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.skipped_young, 1);
        assert_eq!(report.cleaned, 0);
        assert!(provider.has_identity("vault-young"));
    }

    #[tokio::test]
    async fn test_old_entries_are_cleaned() {
        let wal = wal();
        let provider = MockIdentityProvider::new();
        provider.seed_identity("vault-old", &["arn:aws:iam::aws:policy/A"], 1);
        pending_user(&wal, "vault-old").await;
        let later = Utc::now() + chrono::Duration::minutes(11);

        let report = sweep_at(
            &wal,
            &provider,
            ReconcileConfig::default().min_age,
            &RequestContext::new(),
            later,
        )
        .await
        .unwrap();

        assert_eq!(report.cleaned, 1);
        assert!(!provider.has_identity("vault-old"));
        assert!(wal.list_wal().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_entry_without_identity_is_cleaned() {
        let wal = wal();
        let provider = MockIdentityProvider::new();
        pending_user(&wal, "vault-never-created").await;

        let report = rollback_sweep(&wal, &provider, Duration::ZERO, &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(report.cleaned, 1);
        assert!(wal.list_wal().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_entry() {
        let wal = wal();
        let provider = MockIdentityProvider::new();
        provider.seed_identity("vault-stuck", &[], 0);
        provider.fail_delete_identity(crate::core::ProviderError::new(
            "ServiceFailure",
            "try later",
        ));
        pending_user(&wal, "vault-stuck").await;

        let report = rollback_sweep(&wal, &provider, Duration::ZERO, &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(wal.list_wal().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_and_foreign_entries() {
        let wal = wal();
        let provider = MockIdentityProvider::new();
        wal.put_wal(USER_WAL_KIND, json!({"garbage": true})).await.unwrap();
        wal.put_wal("policy", json!({"name": "x"})).await.unwrap();

        let report = rollback_sweep(&wal, &provider, Duration::ZERO, &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(wal.list_wal().await.unwrap().len(), 2);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconciler_runs_and_stops() {
        let storage = Arc::new(MemoryStorage::new());
        let wal = Arc::new(StorageWal::new(storage));
        let provider = Arc::new(MockIdentityProvider::new());
        pending_user(&wal, "vault-crashed").await;

        let shutdown = CancellationToken::new();
        let handle = Reconciler::new(
            wal.clone(),
            provider.clone(),
            ReconcileConfig {
                min_age: Duration::ZERO,
                interval: Duration::from_secs(300),
            },
        )
        .spawn(shutdown.clone());

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(wal.list_wal().await.unwrap().is_empty());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
