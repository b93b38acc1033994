use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{LeaseError, ProviderError, RequestContext, SecureString, StorageError};
use crate::providers::MemoryStorage;
use crate::traits::{AccessKey, AuthorizationData, IdentityProvider, Lease, LeaseResolver, Storage};

/// Mock storage with one-shot failure switches
#[derive(Debug, Default)]
pub struct MockStorage {
    inner: MemoryStorage,
    fail_on_get: AtomicBool,
    fail_on_put: AtomicBool,
    fail_on_delete: AtomicBool,
    put_count: AtomicU32,
    delete_count: AtomicU32,
}

impl MockStorage {
    /// Create new mock storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Make next get fail
    pub fn fail_next_get(&self) {
        self.fail_on_get.store(true, Ordering::SeqCst);
    }

    /// Make next put fail
    pub fn fail_next_put(&self) {
        self.fail_on_put.store(true, Ordering::SeqCst);
    }

    /// Make next delete fail
    pub fn fail_next_delete(&self) {
        self.fail_on_delete.store(true, Ordering::SeqCst);
    }

    /// Get number of put operations
    pub fn put_count(&self) -> u32 {
        self.put_count.load(Ordering::SeqCst)
    }

    /// Get number of delete operations
    pub fn delete_count(&self) -> u32 {
        self.delete_count.load(Ordering::SeqCst)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if self.fail_on_get.swap(false, Ordering::SeqCst) {
            return Err(StorageError::ReadFailure {
                key: key.to_string(),
                reason: "mock failure".into(),
            });
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.put_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_put.swap(false, Ordering::SeqCst) {
            return Err(StorageError::WriteFailure {
                key: key.to_string(),
                reason: "mock failure".into(),
            });
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_delete.swap(false, Ordering::SeqCst) {
            return Err(StorageError::DeleteFailure {
                key: key.to_string(),
                reason: "mock failure".into(),
            });
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// A call made against [`MockIdentityProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateIdentity { name: String, path: String },
    AttachPolicy { name: String, arn: String },
    CreateAccessKey { name: String },
    DeleteIdentity { name: String },
    ListAccessKeys { name: String },
    DeleteAccessKey { name: String, access_key_id: String },
    ListAttachedPolicies { name: String },
    DetachPolicy { name: String, arn: String },
    ExchangeToken,
}

#[derive(Debug, Default, Clone)]
struct MockIdentity {
    policies: Vec<String>,
    keys: Vec<String>,
}

#[derive(Debug, Default)]
struct Failures {
    create_identity: Option<ProviderError>,
    attach_policy: Option<ProviderError>,
    create_access_key: Option<ProviderError>,
    delete_identity: Option<ProviderError>,
    token: VecDeque<ProviderError>,
}

/// In-memory IAM with call recording and scripted failures
///
/// Behaves like IAM where it matters: operations on a missing user return
/// `NoSuchEntity`, and a user with keys or attached policies cannot be
/// deleted.
#[derive(Debug, Default)]
pub struct MockIdentityProvider {
    identities: Arc<DashMap<String, MockIdentity>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Failures>,
    token_calls: AtomicUsize,
    key_counter: AtomicU32,
    token_delay: Option<Duration>,
    authorization: Option<Vec<AuthorizationData>>,
}

impl MockIdentityProvider {
    /// Endpoint of the default authorization entry
    pub const REGISTRY_URL: &'static str = "https://123456789012.dkr.ecr.us-east-1.amazonaws.com";

    /// Token of the default authorization entry (`AWS:mock-token`)
    pub const AUTH_TOKEN: &'static str = "QVdTOm1vY2stdG9rZW4=";

    /// Create an empty provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every token exchange
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Return these entries from every successful token exchange
    pub fn with_authorization_data(mut self, data: Vec<AuthorizationData>) -> Self {
        self.authorization = Some(data);
        self
    }

    /// Fail the next token exchanges with these errors, in order
    pub fn fail_token_exchange(&self, errors: Vec<ProviderError>) {
        self.failures.lock().token.extend(errors);
    }

    /// Fail the next user creation
    pub fn fail_create_identity(&self, error: ProviderError) {
        self.failures.lock().create_identity = Some(error);
    }

    /// Fail the next policy attachment
    pub fn fail_attach_policy(&self, error: ProviderError) {
        self.failures.lock().attach_policy = Some(error);
    }

    /// Fail the next access key creation
    pub fn fail_create_access_key(&self, error: ProviderError) {
        self.failures.lock().create_access_key = Some(error);
    }

    /// Fail the next user deletion
    pub fn fail_delete_identity(&self, error: ProviderError) {
        self.failures.lock().delete_identity = Some(error);
    }

    /// Insert a user directly, with policies and `keys` access keys
    pub fn seed_identity(&self, name: &str, policies: &[&str], keys: usize) {
        let keys = (0..keys).map(|_| self.next_key_id()).collect();
        self.identities.insert(
            name.to_string(),
            MockIdentity {
                policies: policies.iter().map(|p| p.to_string()).collect(),
                keys,
            },
        );
    }

    /// Whether the user exists
    pub fn has_identity(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    /// Policies attached to the user
    pub fn policies_of(&self, name: &str) -> Vec<String> {
        self.identities
            .get(name)
            .map(|i| i.policies.clone())
            .unwrap_or_default()
    }

    /// Number of existing users
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Calls made so far
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of token exchange attempts
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next_key_id(&self) -> String {
        let n = self.key_counter.fetch_add(1, Ordering::SeqCst);
        format!("AKIAMOCK{n:012}")
    }

    fn default_authorization() -> Vec<AuthorizationData> {
        vec![AuthorizationData {
            authorization_token: SecureString::new(Self::AUTH_TOKEN),
            proxy_endpoint: Self::REGISTRY_URL.into(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(12)),
        }]
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn create_identity(&self, name: &str, path: &str) -> Result<(), ProviderError> {
        self.record(Call::CreateIdentity {
            name: name.into(),
            path: path.into(),
        });
        if let Some(err) = self.failures.lock().create_identity.take() {
            return Err(err);
        }
        if self.identities.contains_key(name) {
            return Err(ProviderError::new(
                "EntityAlreadyExists",
                format!("User with name {name} already exists."),
            ));
        }
        self.identities.insert(name.to_string(), MockIdentity::default());
        Ok(())
    }

    async fn attach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.record(Call::AttachPolicy {
            name: name.into(),
            arn: policy_arn.into(),
        });
        if let Some(err) = self.failures.lock().attach_policy.take() {
            return Err(err);
        }
        let mut identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(name))?;
        if !identity.policies.iter().any(|p| p == policy_arn) {
            identity.policies.push(policy_arn.to_string());
        }
        Ok(())
    }

    async fn create_access_key(&self, name: &str) -> Result<AccessKey, ProviderError> {
        self.record(Call::CreateAccessKey { name: name.into() });
        if let Some(err) = self.failures.lock().create_access_key.take() {
            return Err(err);
        }
        let access_key_id = self.next_key_id();
        let mut identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(name))?;
        identity.keys.push(access_key_id.clone());
        Ok(AccessKey {
            secret_access_key: SecureString::new(format!("mock-secret-{access_key_id}")),
            access_key_id,
        })
    }

    async fn delete_identity(&self, name: &str) -> Result<(), ProviderError> {
        self.record(Call::DeleteIdentity { name: name.into() });
        if let Some(err) = self.failures.lock().delete_identity.take() {
            return Err(err);
        }
        let blocked = match self.identities.get(name) {
            None => return Err(ProviderError::not_found(name)),
            Some(identity) => !identity.keys.is_empty() || !identity.policies.is_empty(),
        };
        if blocked {
            return Err(ProviderError::new(
                "DeleteConflict",
                "Cannot delete entity, must delete access keys and detach policies first.",
            ));
        }
        self.identities.remove(name);
        Ok(())
    }

    async fn list_access_keys(&self, name: &str) -> Result<Vec<String>, ProviderError> {
        self.record(Call::ListAccessKeys { name: name.into() });
        self.identities
            .get(name)
            .map(|i| i.keys.clone())
            .ok_or_else(|| ProviderError::not_found(name))
    }

    async fn delete_access_key(
        &self,
        name: &str,
        access_key_id: &str,
    ) -> Result<(), ProviderError> {
        self.record(Call::DeleteAccessKey {
            name: name.into(),
            access_key_id: access_key_id.into(),
        });
        let mut identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(name))?;
        let before = identity.keys.len();
        identity.keys.retain(|k| k != access_key_id);
        if identity.keys.len() == before {
            return Err(ProviderError::new(
                crate::core::NOT_FOUND_CODE,
                format!("The Access Key with id {access_key_id} cannot be found."),
            ));
        }
        Ok(())
    }

    async fn list_attached_policies(&self, name: &str) -> Result<Vec<String>, ProviderError> {
        self.record(Call::ListAttachedPolicies { name: name.into() });
        self.identities
            .get(name)
            .map(|i| i.policies.clone())
            .ok_or_else(|| ProviderError::not_found(name))
    }

    async fn detach_policy(&self, name: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.record(Call::DetachPolicy {
            name: name.into(),
            arn: policy_arn.into(),
        });
        let mut identity = self
            .identities
            .get_mut(name)
            .ok_or_else(|| ProviderError::not_found(name))?;
        identity.policies.retain(|p| p != policy_arn);
        Ok(())
    }

    async fn exchange_token(&self) -> Result<Vec<AuthorizationData>, ProviderError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.record(Call::ExchangeToken);

        if let Some(delay) = self.token_delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().token.pop_front();
        if let Some(err) = failure {
            return Err(err);
        }

        Ok(self
            .authorization
            .clone()
            .unwrap_or_else(Self::default_authorization))
    }
}

/// Lease resolver returning a fixed lease, or a fixed error
#[derive(Debug)]
pub struct FixedLeaseResolver {
    result: Result<Lease, String>,
    last_requested: Mutex<Option<Duration>>,
}

impl FixedLeaseResolver {
    /// Always resolve to `lease`
    pub fn new(lease: Lease) -> Self {
        Self {
            result: Ok(lease),
            last_requested: Mutex::new(None),
        }
    }

    /// Always fail with [`LeaseError::Invalid`]
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            result: Err(reason.into()),
            last_requested: Mutex::new(None),
        }
    }

    /// TTL requested by the most recent call
    pub fn last_requested(&self) -> Option<Duration> {
        *self.last_requested.lock()
    }
}

#[async_trait]
impl LeaseResolver for FixedLeaseResolver {
    async fn resolve(
        &self,
        _ctx: &RequestContext,
        _storage: &dyn Storage,
        requested: Option<Duration>,
    ) -> Result<Lease, LeaseError> {
        *self.last_requested.lock() = requested;
        self.result.clone().map_err(LeaseError::Invalid)
    }
}
