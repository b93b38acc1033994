use std::time::Duration;

use crate::config::{LeaseConfig, ROOT_CONFIG_KEY, RootConfig};
use crate::core::{RegistryPermission, Role, StorageError};
use crate::traits::{Storage, put_json};

/// Role granting pull access
pub fn read_role() -> Role {
    Role::new("readers", RegistryPermission::Read)
}

/// Role granting push and pull access
pub fn write_role() -> Role {
    Role::new("writers", RegistryPermission::Write)
}

/// Lease configuration with the given TTLs in seconds
pub fn lease_config(lease_secs: u64, lease_max_secs: u64) -> LeaseConfig {
    LeaseConfig {
        lease: Duration::from_secs(lease_secs),
        lease_max: Duration::from_secs(lease_max_secs),
    }
}

/// Store a root configuration with the given username template
pub async fn seed_root_config(storage: &dyn Storage, template: &str) -> Result<(), StorageError> {
    let config = RootConfig {
        username_template: template.to_string(),
        ..RootConfig::default()
    };
    put_json(storage, ROOT_CONFIG_KEY, &config).await
}
