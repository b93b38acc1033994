//! Role definitions read from the role store

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Registry permission level requested by a role
///
/// Only `read` and `write` map to a managed policy. Anything else is kept
/// verbatim and produces a policy-less identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegistryPermission {
    /// Pull-only access
    Read,
    /// Push and pull access
    Write,
    /// Unrecognized value
    Other(String),
}

impl RegistryPermission {
    /// Parse from the stored string form
    pub fn parse(value: &str) -> Self {
        match value {
            "read" => Self::Read,
            "write" => Self::Write,
            other => Self::Other(other.to_string()),
        }
    }

    /// Stored string form
    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for RegistryPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RegistryPermission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegistryPermission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

/// A configured role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Role name
    pub name: String,

    /// Requested registry permission
    pub registry_permission: RegistryPermission,
}

impl Role {
    /// Create a role
    pub fn new(name: impl Into<String>, registry_permission: RegistryPermission) -> Self {
        Self {
            name: name.into(),
            registry_permission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_round_trips_unknown_values() {
        let role: Role =
            serde_json::from_str(r#"{"name":"ci","registry_permission":"admin"}"#).unwrap();
        assert_eq!(
            role.registry_permission,
            RegistryPermission::Other("admin".into())
        );
        assert_eq!(
            serde_json::to_value(&role).unwrap()["registry_permission"],
            "admin"
        );
    }

    #[test]
    fn test_permission_parse() {
        assert_eq!(RegistryPermission::parse("read"), RegistryPermission::Read);
        assert_eq!(RegistryPermission::parse("write"), RegistryPermission::Write);
    }
}
