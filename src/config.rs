use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::keys::AccessibleProtection;

/// Vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Access group stamped on every generated or imported key.
    pub access_group: String,
    /// Secret-store service under which key metadata is kept.
    pub metadata_service: String,
    /// Protection level for metadata entries and new keys.
    pub protection: AccessibleProtection,
    /// Biometric prompt used when a signing call does not supply one.
    pub default_prompt: String,
    /// Buffered update events per subscriber before the oldest are dropped.
    pub event_capacity: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            access_group: String::new(),
            metadata_service: "EosioKeyMetadataService".into(),
            protection: AccessibleProtection::default(),
            default_prompt: "Sign Transaction".into(),
            event_capacity: 64,
        }
    }
}

impl VaultConfig {
    pub fn new(access_group: impl Into<String>) -> Self {
        Self {
            access_group: access_group.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Serialization(e.to_string()))?;
        if config.event_capacity == 0 {
            return Err(VaultError::Serialization(
                "event_capacity must be greater than zero".into(),
            ));
        }
        Ok(config)
    }
}
