// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for Meridian node components.

use crate::chain::MigrationParams;
use serde::{Deserialize, Serialize};

/// Configuration for the migration subsystem of a node (`config.toml`,
/// `[migrations]` table). On the old network both fields stay at their
/// defaults; an operator standing up a node of the *new* network enables the
/// subsystem and points it at their old node.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct MigrationsConfig {
    /// When true, this node is a member of the new network: it restores from
    /// the genesis snapshot at boot, enters `GenesisMigration`, and polls
    /// `migrate_from` for changesets until the old chain's end height.
    #[serde(default)]
    pub enable: bool,
    /// Listen address of this operator's old-network node, e.g.
    /// `http://127.0.0.1:8484`. Required when `enable` is true.
    #[serde(default)]
    pub migrate_from: String,
}

impl MigrationsConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.enable && self.migrate_from.is_empty() {
            return Err(
                "Configuration Error: 'migrations.migrate_from' is required when 'migrations.enable' is true."
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// The subset of the genesis configuration the migration subsystem consumes.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct GenesisConfig {
    /// The unique identifier of the chain this genesis file describes.
    pub chain_id: String,
    /// Hex-encoded SHA-256 of the genesis state snapshot. When set, the node
    /// must restore its database from a snapshot file with exactly this hash
    /// before processing any block.
    #[serde(default)]
    pub state_hash: Option<String>,
    /// The migration window of the old chain this network was born from.
    /// `None` for networks not created by a migration.
    #[serde(default)]
    pub migration: Option<MigrationParams>,
}

impl GenesisConfig {
    /// Decodes `state_hash` into raw bytes, if set.
    pub fn state_hash_bytes(&self) -> Result<Option<[u8; 32]>, String> {
        let Some(hash_hex) = &self.state_hash else {
            return Ok(None);
        };
        let raw = hex::decode(hash_hex)
            .map_err(|e| format!("genesis state_hash is not valid hex: {}", e))?;
        let arr: [u8; 32] = raw
            .try_into()
            .map_err(|_| "genesis state_hash must be 32 bytes".to_string())?;
        Ok(Some(arr))
    }

    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.chain_id.is_empty() {
            return Err("Configuration Error: 'chain_id' must not be empty.".to_string());
        }
        self.state_hash_bytes().map_err(|e| {
            format!("Configuration Error: {}", e)
        })?;
        if let Some(window) = &self.migration {
            if window.end_height <= window.start_height {
                return Err(
                    "Configuration Error: genesis migration end_height must be greater than start_height."
                        .to_string(),
                );
            }
        }
        Ok(())
    }
}

/// Top-level node configuration (`config.toml`).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Root directory for node state; the migration store lives under
    /// `<root>/migrations/`.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    /// The network address for the JSON/HTTP RPC server to listen on.
    #[serde(default = "default_rpc_listen_address")]
    pub rpc_listen_address: String,
    /// Path to the genesis state snapshot file, when restoring from one.
    #[serde(default)]
    pub genesis_state: String,
    /// Migration subsystem configuration.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

fn default_root_dir() -> String {
    ".meridian".to_string()
}

fn default_rpc_listen_address() -> String {
    "127.0.0.1:8484".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            rpc_listen_address: default_rpc_listen_address(),
            genesis_state: String::new(),
            migrations: MigrationsConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.root_dir.is_empty() {
            return Err("Configuration Error: 'root_dir' must not be empty.".to_string());
        }
        self.migrations.validate()
    }
}
