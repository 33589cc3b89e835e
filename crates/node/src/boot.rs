// Path: crates/node/src/boot.rs

//! Boot sequence pieces the migration subsystem contributes to the node:
//! configuration loading, the chain context a node starts from, and the
//! genesis snapshot restore a new-network node performs before its first
//! block.

use anyhow::{anyhow, Context};
use meridian_api::module::SnapshotRestorer;
use meridian_api::resolutions::ResolutionStore;
use meridian_api::sql::{Database, Executor, SqlValue};
use meridian_migrations::genesis::{cleanup_resolutions_after_migration, restore_genesis_state};
use meridian_migrations::store::MIGRATIONS_SCHEMA;
use meridian_types::chain::ChainContext;
use meridian_types::config::{GenesisConfig, NodeConfig};
use meridian_types::error::SqlError;
use std::path::Path;

const SQL_SCHEMA_EXISTS: &str =
    "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1";

/// Loads and validates the node configuration from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let cfg: NodeConfig = toml::from_str(&raw).context("failed to parse config file")?;
    cfg.validate().map_err(|e| anyhow!(e))?;
    Ok(cfg)
}

/// The chain context a node boots with. A node of a new network carries the
/// old chain's window in its genesis config and, when the migration
/// subsystem is enabled, starts in `GenesisMigration`.
pub fn initial_chain_context(cfg: &NodeConfig, genesis: &GenesisConfig) -> ChainContext {
    let mut chain = ChainContext {
        migration_params: genesis.migration,
        ..Default::default()
    };
    if cfg.migrations.enable {
        chain.network_params.enter_genesis_migration();
    }
    chain
}

/// Whether the local database already holds chain state. The reserved
/// migrations schema exists on every initialized node, so its presence is
/// the marker.
pub async fn is_db_initialized(ex: &dyn Executor) -> Result<bool, SqlError> {
    let rs = ex
        .execute(
            SQL_SCHEMA_EXISTS,
            &[SqlValue::Text(MIGRATIONS_SCHEMA.to_string())],
        )
        .await?;
    Ok(!rs.rows.is_empty())
}

/// Restores the database from the genesis snapshot when this node needs it:
/// the database is uninitialized and the genesis config pins a `state_hash`.
/// Returns whether a restore happened.
///
/// Failure modes are fatal at boot: a pinned hash with no snapshot file is
/// `snapshot file not provided`; a file hashing to anything other than the
/// pinned hash aborts before touching the database.
pub async fn restore_db(
    cfg: &NodeConfig,
    genesis: &GenesisConfig,
    db: &dyn Database,
    restorer: &dyn SnapshotRestorer,
    resolutions: &dyn ResolutionStore,
) -> anyhow::Result<bool> {
    if is_db_initialized(db).await? {
        return Ok(false);
    }

    let Some(state_hash) = genesis.state_hash_bytes().map_err(|e| anyhow!(e))? else {
        return Ok(false);
    };

    if cfg.genesis_state.is_empty() {
        return Err(anyhow!(meridian_types::error::SnapshotError::NotProvided));
    }

    restore_genesis_state(Path::new(&cfg.genesis_state), state_hash, restorer)
        .await
        .context("failed to restore DB from genesis snapshot")?;

    // the dump carries the old network's migration bookkeeping; clear it
    // before the first block
    let tx = db.begin_commit_tx().await.map_err(|e| anyhow!(e))?;
    meridian_migrations::store::init_migration_schema(tx.as_ref()).await?;
    cleanup_resolutions_after_migration(tx.as_ref(), resolutions).await?;
    tx.commit().await.map_err(|e| anyhow!(e))?;

    tracing::info!(
        target: "node",
        snapshot = %cfg.genesis_state,
        "DB restored from genesis snapshot"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_api::test_utils::{MemDatabase, MemRestorer, MemVoteStore};
    use meridian_types::chain::MigrationParams;
    use meridian_types::config::MigrationsConfig;
    use meridian_types::migrations::MigrationStatus;
    use sha2::{Digest, Sha256};
    use tempfile::tempdir;

    fn genesis_with_hash(hash: Option<[u8; 32]>) -> GenesisConfig {
        GenesisConfig {
            chain_id: "meridian-2".into(),
            state_hash: hash.map(hex::encode),
            migration: Some(MigrationParams {
                start_height: 113,
                end_height: 118,
            }),
        }
    }

    #[test]
    fn config_loads_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
root_dir = "/var/lib/meridian"
rpc_listen_address = "0.0.0.0:8484"
genesis_state = "/var/lib/meridian/genesis-state.sql.gz"

[migrations]
enable = true
migrate_from = "http://old-node:8484"
"#,
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert!(cfg.migrations.enable);
        assert_eq!(cfg.migrations.migrate_from, "http://old-node:8484");

        // enabling migrations without a source address fails validation
        std::fs::write(&path, "[migrations]\nenable = true\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn migration_child_boots_in_genesis_migration() {
        let cfg = NodeConfig {
            migrations: MigrationsConfig {
                enable: true,
                migrate_from: "http://old:8484".into(),
            },
            ..Default::default()
        };
        let chain = initial_chain_context(&cfg, &genesis_with_hash(None));
        assert_eq!(
            chain.network_params.migration_status,
            MigrationStatus::GenesisMigration
        );
        assert_eq!(
            chain.migration_params,
            Some(MigrationParams {
                start_height: 113,
                end_height: 118,
            })
        );

        // an ordinary node starts idle
        let chain = initial_chain_context(&NodeConfig::default(), &GenesisConfig::default());
        assert_eq!(
            chain.network_params.migration_status,
            MigrationStatus::NoActiveMigration
        );
    }

    #[tokio::test]
    async fn restore_skipped_without_state_hash() {
        let db = MemDatabase::new();
        let restorer = MemRestorer::default();
        let votes = MemVoteStore::new();
        let restored = restore_db(
            &NodeConfig::default(),
            &genesis_with_hash(None),
            &db,
            &restorer,
            &votes,
        )
        .await
        .unwrap();
        assert!(!restored);
        assert!(restorer.restored.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn pinned_hash_without_file_is_fatal() {
        let db = MemDatabase::new();
        let restorer = MemRestorer::default();
        let votes = MemVoteStore::new();
        let err = restore_db(
            &NodeConfig::default(),
            &genesis_with_hash(Some([0xAA; 32])),
            &db,
            &restorer,
            &votes,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("snapshot file not provided"));
    }

    #[tokio::test]
    async fn restore_applies_and_initializes() {
        let dir = tempdir().unwrap();
        let snap = dir.path().join("genesis-state.sql");
        std::fs::write(&snap, b"-- dump").unwrap();
        let hash: [u8; 32] = Sha256::digest(b"-- dump").into();

        let cfg = NodeConfig {
            genesis_state: snap.to_string_lossy().into_owned(),
            ..Default::default()
        };
        let db = MemDatabase::new();
        let restorer = MemRestorer::default();
        let votes = MemVoteStore::new();

        let restored = restore_db(&cfg, &genesis_with_hash(Some(hash)), &db, &restorer, &votes)
            .await
            .unwrap();
        assert!(restored);
        assert!(*restorer.replica_identity_enabled.lock().unwrap());
        // the migrations schema now exists, so the node counts as initialized
        assert!(is_db_initialized(&db).await.unwrap());

        // a second boot does not restore again
        let restored = restore_db(&cfg, &genesis_with_hash(Some(hash)), &db, &restorer, &votes)
            .await
            .unwrap();
        assert!(!restored);
    }
}
