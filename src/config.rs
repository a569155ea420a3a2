//! On-disk identity and bootstrap configuration.
//!
//! Unlike this codebase's ambient daemon-style TOML configuration (which
//! falls back to defaults when the file is absent), this file gates
//! identity material: a missing or malformed config aborts startup. There
//! is no default fallback here by design.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::network::Endpoint;
use crate::node_id::NodeId;
use crate::node_info::PublicKey;
use crate::{codec, DhtError, Result};

/// A bootstrap peer record, as stored in [`DhtConfig::contacts`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: NodeId,
    pub endpoint: Endpoint,
    pub public_key: PublicKey,
}

/// Opaque asymmetric private-key bytes, consumed by this crate only as
/// bytes to persist; never inspected or used cryptographically here.
pub type PrivateKey = Vec<u8>;

/// The on-disk identity and bootstrap record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhtConfig {
    pub private_key: PrivateKey,
    pub node_id: NodeId,
    pub contacts: Vec<Contact>,
}

impl DhtConfig {
    /// Decode a config record from CBOR bytes already read from disk.
    ///
    /// Fails hard: a missing required field, a malformed identifier, or a
    /// corrupt frame are all reported as [`DhtError::MalformedConfig`];
    /// there is no default to fall back to.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: DhtConfig =
            codec::from_slice(bytes).map_err(|e| DhtError::MalformedConfig(e.to_string()))?;
        if config.private_key.is_empty() {
            return Err(DhtError::MalformedConfig("private_key is empty".into()));
        }
        if config.node_id.is_zero() {
            return Err(DhtError::MalformedConfig("node_id is zero".into()));
        }
        for contact in &config.contacts {
            if contact.node_id.is_zero() {
                return Err(DhtError::MalformedConfig("contact node_id is zero".into()));
            }
        }
        Ok(config)
    }

    /// Encode this config record to CBOR bytes for writing to disk.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::to_vec(self).map_err(|e| DhtError::MalformedConfig(e.to_string()))
    }

    /// Load from `path`. Aborts (returns `Err`) if the file is absent,
    /// unreadable, or fails [`Self::from_bytes`]'s validation.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "failed to read dht config, aborting startup");
            DhtError::MalformedConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_bytes(&bytes)?;
        info!(path = %path.display(), node_id = %config.node_id, contacts = config.contacts.len(), "loaded dht config");
        Ok(config)
    }

    /// Write this config to `path`. Called by the host on every accepted
    /// bootstrap-peer change; debouncing such writes is a host concern.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes)
            .map_err(|e| DhtError::MalformedConfig(format!("cannot write {}: {e}", path.display())))?;
        info!(path = %path.display(), "saved dht config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DhtConfig {
        DhtConfig {
            private_key: vec![1, 2, 3, 4],
            node_id: NodeId::padded(&[0x01]),
            contacts: vec![Contact {
                node_id: NodeId::padded(&[0x02]),
                endpoint: Endpoint {
                    ip: "127.0.0.1".into(),
                    port: 9000,
                },
                public_key: [9u8; 32],
            }],
        }
    }

    #[test]
    fn round_trips_through_bytes() {
        let config = sample();
        let bytes = config.to_bytes().expect("encode");
        let decoded = DhtConfig::from_bytes(&bytes).expect("decode");
        assert_eq!(config, decoded);
    }

    #[test]
    fn rejects_zero_node_id() {
        let mut config = sample();
        config.node_id = NodeId::ZERO;
        let bytes = codec::to_vec(&config).expect("encode");
        assert!(DhtConfig::from_bytes(&bytes).is_err());
    }

    #[test]
    fn rejects_empty_private_key() {
        let mut config = sample();
        config.private_key.clear();
        let bytes = codec::to_vec(&config).expect("encode");
        assert!(DhtConfig::from_bytes(&bytes).is_err());
    }

    #[test]
    fn load_fails_hard_on_missing_file() {
        let path = Path::new("/nonexistent/dht_config_for_tests");
        assert!(DhtConfig::load(path).is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("horizon-dht-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join(crate::DEFAULT_CONFIG_FILENAME);
        let config = sample();
        config.save(&path).expect("save");
        let loaded = DhtConfig::load(&path).expect("load");
        assert_eq!(config, loaded);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
