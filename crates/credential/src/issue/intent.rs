//! Intent records written to the WAL before remote mutations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// WAL kind for pending user creations
pub const USER_WAL_KIND: &str = "user";

/// A remote mutation that may need undoing after a crash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum WalIntent {
    /// An IAM user is about to be created
    PendingUserCreation {
        /// Name of the user
        username: String,
        /// When the intent was recorded
        created_at: DateTime<Utc>,
    },
}

impl WalIntent {
    /// Intent for creating `username` now
    pub fn pending_user(username: impl Into<String>) -> Self {
        Self::PendingUserCreation {
            username: username.into(),
            created_at: Utc::now(),
        }
    }

    /// WAL kind this intent is stored under
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PendingUserCreation { .. } => USER_WAL_KIND,
        }
    }

    /// Name of the identity the intent refers to
    pub fn username(&self) -> &str {
        match self {
            Self::PendingUserCreation { username, .. } => username,
        }
    }

    /// Encode as a WAL payload
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode a WAL payload
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_tagged() {
        let intent = WalIntent::pending_user("vault-bob");
        let value = intent.to_value().unwrap();
        assert_eq!(value["intent"], "pending_user_creation");
        assert_eq!(value["username"], "vault-bob");
        assert_eq!(intent.kind(), USER_WAL_KIND);
    }

    #[test]
    fn test_rejects_untagged_payload() {
        assert!(WalIntent::from_value(json!({"username": "vault-bob"})).is_err());
    }
}
