//! Integration tests for WAL-based recovery of failed issuances
//!
//! A failure after the IAM user exists leaves the WAL entry in place; a
//! later sweep must delete the user and only then the entry.

use ecr_credential::issue::{USER_WAL_KIND, WalIntent};
use ecr_credential::prelude::*;
use ecr_credential::testing::{MockIdentityProvider, MockStorage, read_role};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fixture {
    backend: EcrBackend,
    provider: Arc<MockIdentityProvider>,
    storage: Arc<MockStorage>,
    wal: Arc<StorageWal>,
}

/// Helper to create a backend whose reconciler has no grace period
fn create_fixture(min_age: Duration) -> Fixture {
    let storage = Arc::new(MockStorage::new());
    let provider = Arc::new(MockIdentityProvider::new());
    let wal = Arc::new(StorageWal::new(storage.clone()));
    let config = BackendConfig {
        reconcile: ReconcileConfig {
            min_age,
            interval: Duration::from_secs(60),
        },
        ..BackendConfig::default()
    };
    let backend = EcrBackend::builder()
        .storage(storage.clone())
        .provider(provider.clone())
        .wal(wal.clone())
        .config(config)
        .build()
        .unwrap();
    Fixture {
        backend,
        provider,
        storage,
        wal,
    }
}

#[tokio::test]
async fn test_create_failure_deletes_wal_entry() {
    // GIVEN: IAM refuses to create the user
    let f = create_fixture(Duration::ZERO);
    f.provider
        .fail_create_identity(ProviderError::new("ServiceFailure", "internal error"));

    // WHEN: Issuance runs
    let failure = f
        .backend
        .issue(&RequestContext::new(), &IssueRequest::new("dan", read_role()))
        .await
        .unwrap_err();

    // THEN: The error is a remote one and nothing is left behind
    assert_eq!(failure.error.kind(), ErrorKind::RemoteApi);
    assert!(failure.partial.is_none());
    assert!(f.wal.list_wal().await.unwrap().is_empty());
    assert_eq!(f.provider.identity_count(), 0);
}

#[tokio::test]
async fn test_attach_failure_is_rolled_back_by_sweep() {
    // GIVEN: Policy attachment fails after the user was created
    let f = create_fixture(Duration::ZERO);
    f.provider
        .fail_attach_policy(ProviderError::new("InvalidInput", "policy arn rejected"));

    let failure = f
        .backend
        .issue(&RequestContext::new(), &IssueRequest::new("eve", read_role()))
        .await
        .unwrap_err();
    let partial = failure.partial.expect("partial issue");

    // THEN: The user and its WAL entry are still there
    assert_eq!(partial.state, IssueState::IdentityCreated);
    assert!(f.provider.has_identity(&partial.username));
    let entry = f.wal.get_wal(&partial.wal_id).await.unwrap().unwrap();
    assert_eq!(entry.kind, USER_WAL_KIND);

    // WHEN: A sweep runs
    let report = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();

    // THEN: The user is gone, then the WAL entry
    assert_eq!(report.cleaned, 1);
    assert!(!f.provider.has_identity(&partial.username));
    assert!(f.wal.get_wal(&partial.wal_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_key_failure_sweep_removes_attached_policy() {
    // GIVEN: Access key creation fails after the policy was attached
    let f = create_fixture(Duration::ZERO);
    f.provider
        .fail_create_access_key(ProviderError::new("LimitExceeded", "too many keys"));

    let failure = f
        .backend
        .issue(&RequestContext::new(), &IssueRequest::new("frank", read_role()))
        .await
        .unwrap_err();
    let partial = failure.partial.unwrap();
    assert_eq!(partial.state, IssueState::PolicyAttached);
    assert_eq!(f.provider.policies_of(&partial.username).len(), 1);

    // WHEN: A sweep runs
    let report = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();

    // THEN: The policy was detached so the user could be deleted
    assert_eq!(report.cleaned, 1);
    assert_eq!(f.provider.identity_count(), 0);
}

#[tokio::test]
async fn test_commit_failure_returns_no_secret_and_is_recovered() {
    // GIVEN: The WAL delete that commits the issuance fails
    let f = create_fixture(Duration::ZERO);
    f.storage.fail_next_delete();

    // WHEN: Issuance runs
    let failure = f
        .backend
        .issue(&RequestContext::new(), &IssueRequest::new("gina", read_role()))
        .await
        .unwrap_err();

    // THEN: The key was minted but not handed out
    assert_eq!(failure.error.kind(), ErrorKind::Durability);
    let partial = failure.partial.unwrap();
    assert_eq!(partial.state, IssueState::KeyCreated);
    assert!(partial.access_key_id.is_some());

    // AND: The sweep deletes the key and the user
    let report = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();
    assert_eq!(report.cleaned, 1);
    assert!(!f.provider.has_identity(&partial.username));
}

#[tokio::test]
async fn test_grace_period_protects_in_flight_issuance() {
    // GIVEN: A default ten minute grace period and a fresh pending entry
    let f = create_fixture(ReconcileConfig::default().min_age);
    f.provider.seed_identity("vault-in-flight", &[], 0);
    let intent = WalIntent::pending_user("vault-in-flight");
    f.wal
        .put_wal(intent.kind(), intent.to_value().unwrap())
        .await
        .unwrap();

    // WHEN: A sweep runs immediately
    let report = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();

    // THEN: The entry is left alone
    assert_eq!(report.skipped_young, 1);
    assert_eq!(report.cleaned, 0);
    assert!(f.provider.has_identity("vault-in-flight"));
}

#[tokio::test]
async fn test_failed_cleanup_is_retried_on_next_sweep() {
    // GIVEN: A crashed issuance whose first cleanup attempt fails
    let f = create_fixture(Duration::ZERO);
    f.provider.seed_identity("vault-crashed", &[], 1);
    let intent = WalIntent::pending_user("vault-crashed");
    f.wal
        .put_wal(intent.kind(), intent.to_value().unwrap())
        .await
        .unwrap();
    f.provider
        .fail_delete_identity(ProviderError::new("ServiceFailure", "try again"));

    // WHEN: Two sweeps run
    let first = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();
    let second = f.backend.rollback_sweep(&RequestContext::new()).await.unwrap();

    // THEN: The first fails and keeps the entry, the second cleans up
    assert_eq!((first.failed, first.cleaned), (1, 0));
    assert_eq!((second.failed, second.cleaned), (0, 1));
    assert!(f.wal.list_wal().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_spawned_reconciler_cleans_up_and_stops() {
    // GIVEN: A pending entry for a user that exists
    let f = create_fixture(Duration::ZERO);
    f.provider.seed_identity("vault-orphan", &["arn:aws:iam::aws:policy/X"], 1);
    let intent = WalIntent::pending_user("vault-orphan");
    f.wal
        .put_wal(intent.kind(), intent.to_value().unwrap())
        .await
        .unwrap();

    // WHEN: The reconciler runs past one interval
    let shutdown = CancellationToken::new();
    let handle = f.backend.spawn_reconciler(shutdown.clone());
    tokio::time::sleep(Duration::from_secs(61)).await;

    // THEN: The orphan is gone
    assert!(!f.provider.has_identity("vault-orphan"));
    assert!(f.wal.list_wal().await.unwrap().is_empty());

    // AND: The task stops on shutdown
    shutdown.cancel();
    handle.await.unwrap();
}
