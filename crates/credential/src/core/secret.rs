//! Issued secret and its response data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;

use super::role::Role;
use super::secure::SecureString;

/// Secret type under which access keys are registered with the lease subsystem
pub const SECRET_ACCESS_KEY_TYPE: &str = "access_keys";

/// Internal data field holding the IAM username
pub const INTERNAL_USERNAME: &str = "username";
/// Internal data field holding the role the secret was issued for
pub const INTERNAL_POLICY: &str = "policy";
/// Access key ID field (public and internal)
pub const FIELD_ACCESS_KEY: &str = "access_key";
/// Secret access key field (public and internal)
pub const FIELD_SECRET_KEY: &str = "secret_key";

/// Credentials issued for a freshly created identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedSecret {
    /// Access key ID
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: SecureString,

    /// Name of the identity the key belongs to
    pub username: String,

    /// Role the secret was issued for
    pub role: Role,

    /// Lease TTL (zero means "use system default")
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Lease max TTL (zero means "use system default")
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,

    /// When the secret was issued
    pub issued_at: DateTime<Utc>,
}

impl IssuedSecret {
    /// Data returned to the caller
    pub fn public_data(&self) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert(FIELD_ACCESS_KEY.into(), json!(self.access_key_id));
        data.insert(FIELD_SECRET_KEY.into(), json!(self.secret_access_key.expose()));
        data
    }

    /// Data kept by the lease subsystem and handed back on renew/revoke
    pub fn internal_data(&self) -> Map<String, Value> {
        let mut data = self.public_data();
        data.insert(INTERNAL_USERNAME.into(), json!(self.username));
        data.insert(
            INTERNAL_POLICY.into(),
            serde_json::to_value(&self.role).unwrap_or(Value::Null),
        );
        data
    }

    /// Absolute time after which the secret can no longer be renewed
    pub fn max_expiry(&self) -> Option<DateTime<Utc>> {
        if self.max_ttl.is_zero() {
            return None;
        }
        chrono::Duration::from_std(self.max_ttl)
            .ok()
            .and_then(|d| self.issued_at.checked_add_signed(d))
    }
}

/// Extract the username from a secret's internal data
///
/// Returns `None` when the field is absent or not a string.
pub fn internal_username(internal: &Map<String, Value>) -> Option<&str> {
    internal.get(INTERNAL_USERNAME).and_then(Value::as_str)
}
