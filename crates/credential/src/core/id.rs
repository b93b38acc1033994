//! Write-ahead log entry identifier

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a WAL entry
///
/// Rendered as a hyphenated UUID; this is also the storage key suffix
/// under which the entry lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WalId(Uuid);

impl WalId {
    /// Generate a new WAL ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a WAL ID from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WalId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display() {
        let id = WalId::new();
        assert_eq!(WalId::parse(&id.to_string()), Some(id));
        assert_eq!(WalId::parse("not-a-uuid"), None);
    }
}
