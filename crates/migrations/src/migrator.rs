// Path: crates/migrations/src/migrator.rs

//! The migration orchestrator. One instance is owned by the node and passed
//! explicitly to the block processor and the RPC layer; there is no ambient
//! global.
//!
//! The block processor drives the state machine by calling
//! [`Migrator::notify_height`] exactly once per committed block, from within
//! the block commit transaction. Everything the migrator persists (the
//! active record, the changeset watermark, the changeset files) is either
//! inside that transaction or gated behind the changeset store's sentinel
//! discipline, so a crash at any point leaves the block and its changeset
//! either both durable or both absent.

use crate::changesets::ChangesetStore;
use crate::store;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use meridian_api::module::{ChangesetReceiver, MigratorModule, SnapshotProducer};
use meridian_api::sql::Executor;
use meridian_types::chain::BlockContext;
use meridian_types::error::{ChangesetStoreError, MigrationError, SnapshotError};
use meridian_types::migrations::{ActiveMigration, MigrationMetadata, MigrationStatus};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name of the compressed genesis snapshot under `snapshots/`.
pub const GENESIS_SNAPSHOT_FILE: &str = "genesis-state.sql.gz";

const SNAPSHOTS_DIR: &str = "snapshots";
const CHANGESETS_DIR: &str = "changesets";

#[derive(Debug, Default, Clone)]
struct MigratorState {
    active: Option<ActiveMigration>,
    genesis_hash: Option<[u8; 32]>,
    snapshot_size: u64,
}

/// The migration orchestrator. See the module docs for the driving contract.
pub struct Migrator {
    snapshot_path: PathBuf,
    changesets: ChangesetStore,
    snapshotter: Box<dyn SnapshotProducer>,
    state: Mutex<MigratorState>,
}

impl Migrator {
    /// Opens the migrator rooted at `<root>/migrations`, recovering from any
    /// torn changeset directories and re-hashing a genesis snapshot left by a
    /// previous run.
    pub fn open(
        root_dir: &Path,
        snapshotter: Box<dyn SnapshotProducer>,
    ) -> Result<Self, MigrationError> {
        let dir = root_dir.join("migrations");
        let snapshots = dir.join(SNAPSHOTS_DIR);
        fs::create_dir_all(&snapshots).map_err(ChangesetStoreError::Io)?;
        let changesets = ChangesetStore::open(&dir.join(CHANGESETS_DIR))?;

        let snapshot_path = snapshots.join(GENESIS_SNAPSHOT_FILE);
        let mut state = MigratorState::default();
        if snapshot_path.exists() {
            let bytes = fs::read(&snapshot_path).map_err(ChangesetStoreError::Io)?;
            state.genesis_hash = Some(Sha256::digest(&bytes).into());
            state.snapshot_size = bytes.len() as u64;
            tracing::info!(
                target: "migrations",
                hash = %hex::encode(state.genesis_hash.unwrap_or_default()),
                size = state.snapshot_size,
                "recovered existing genesis snapshot"
            );
        }

        Ok(Self {
            snapshot_path,
            changesets,
            snapshotter,
            state: Mutex::new(state),
        })
    }

    /// Path of the genesis snapshot file, whether or not it exists yet.
    pub fn genesis_snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// The cached active migration record, if one has been loaded.
    pub fn active_migration(&self) -> Option<ActiveMigration> {
        self.state.lock().expect("migrator state lock").active
    }

    /// Loads the active migration record from the state store into the
    /// in-memory cache. The node calls this once at startup; afterwards
    /// `notify_height` keeps the cache warm.
    pub async fn load_active(&self, ex: &dyn Executor) -> Result<(), MigrationError> {
        let active = store::get_migration(ex).await?;
        self.state.lock().expect("migrator state lock").active = active;
        Ok(())
    }

    /// Loads a committed changeset fully into memory. Serves the pull API's
    /// read path; never blocks the writer.
    pub fn load_changeset(&self, height: i64) -> Result<Vec<u8>, ChangesetStoreError> {
        self.changesets.load(height)
    }

    async fn hydrate_active(&self, tx: &dyn Executor) -> Result<Option<ActiveMigration>, MigrationError> {
        if let Some(active) = self.active_migration() {
            return Ok(Some(active));
        }
        let active = store::get_migration(tx).await?;
        if active.is_some() {
            self.state.lock().expect("migrator state lock").active = active;
        }
        Ok(active)
    }

    fn snapshot_exists(&self) -> bool {
        self.state
            .lock()
            .expect("migrator state lock")
            .genesis_hash
            .is_some()
    }

    /// Produces the genesis snapshot: a gzip-compressed logical dump of the
    /// state the given transaction sees, written atomically. The SHA-256 of
    /// the compressed file becomes the new network's genesis `state_hash`.
    async fn produce_genesis_snapshot(&self, tx: &dyn Executor) -> Result<(), MigrationError> {
        let dump = self.snapshotter.dump_state(tx).await?;

        let tmp_path = self.snapshot_path.with_extension("gz.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(SnapshotError::Io)?;

        let mut encoder = GzEncoder::new(HashingWriter::new(file), Compression::default());
        encoder.write_all(&dump).map_err(SnapshotError::Io)?;
        let writer = encoder.finish().map_err(SnapshotError::Io)?;
        let (file, hash, size) = writer.into_parts();
        file.sync_all().map_err(SnapshotError::Io)?;
        drop(file);

        fs::rename(&tmp_path, &self.snapshot_path).map_err(SnapshotError::Io)?;
        if let Some(parent) = self.snapshot_path.parent() {
            File::open(parent)
                .and_then(|d| d.sync_all())
                .map_err(SnapshotError::Io)?;
        }

        {
            let mut state = self.state.lock().expect("migrator state lock");
            state.genesis_hash = Some(hash);
            state.snapshot_size = size;
        }
        tracing::info!(
            target: "migrations",
            hash = %hex::encode(hash),
            size,
            "genesis snapshot produced"
        );
        Ok(())
    }
}

#[async_trait]
impl MigratorModule for Migrator {
    async fn notify_height(
        &self,
        block: &mut BlockContext<'_>,
        tx: &dyn Executor,
    ) -> Result<(), MigrationError> {
        let status = block.chain.network_params.migration_status;
        match status {
            MigrationStatus::NoActiveMigration | MigrationStatus::GenesisMigration => {
                return Ok(())
            }
            MigrationStatus::ActivationPeriod
            | MigrationStatus::MigrationInProgress
            | MigrationStatus::MigrationCompleted => {}
        }

        let Some(active) = self.hydrate_active(tx).await? else {
            // the status parameter and the state store can only disagree if
            // consensus state diverged; this must not be papered over
            panic!(
                "migration status is {} but no active migration record exists",
                status
            );
        };
        let height = block.height;

        if block.chain.network_params.migration_status == MigrationStatus::ActivationPeriod {
            // the snapshot captures the state the new network starts from,
            // taken with the last pre-activation block (immediately, when the
            // activation period is zero)
            if height + 1 >= active.start_height && !self.snapshot_exists() {
                self.produce_genesis_snapshot(tx).await?;
            }
            if height >= active.start_height {
                block
                    .chain
                    .network_params
                    .transition_migration_status(MigrationStatus::MigrationInProgress);
                tracing::info!(
                    target: "migrations",
                    height,
                    start_height = active.start_height,
                    end_height = active.end_height,
                    "migration window open"
                );
            }
        }

        if block.chain.network_params.migration_status == MigrationStatus::MigrationInProgress
            && height >= active.end_height
        {
            assert!(
                height == active.end_height,
                "passed migration end height {} without completing (at height {})",
                active.end_height,
                height
            );
            block
                .chain
                .network_params
                .transition_migration_status(MigrationStatus::MigrationCompleted);
            tracing::info!(
                target: "migrations",
                height,
                "migration completed; this network halts after this block"
            );
        }

        Ok(())
    }

    async fn store_changesets(
        &self,
        height: i64,
        changes: ChangesetReceiver,
    ) -> Result<(), MigrationError> {
        self.changesets
            .append(height, changes)
            .await
            .map_err(MigrationError::Changesets)
    }

    async fn persist_last_changeset_height(
        &self,
        tx: &dyn Executor,
        height: i64,
    ) -> Result<(), MigrationError> {
        store::set_last_changeset_height(tx, height).await?;
        Ok(())
    }

    async fn get_migration_metadata(
        &self,
        status: MigrationStatus,
    ) -> Result<MigrationMetadata, MigrationError> {
        let state = self.state.lock().expect("migrator state lock").clone();
        let (start_height, end_height) = state
            .active
            .map(|a| (a.start_height, a.end_height))
            .unwrap_or((0, 0));
        let last_changeset_height = self
            .changesets
            .last_stored_height()
            .map_err(MigrationError::Changesets)?
            .unwrap_or(0);
        Ok(MigrationMetadata {
            status,
            start_height,
            end_height,
            genesis_hash: state.genesis_hash,
            snapshot_size: state.snapshot_size,
            last_changeset_height,
        })
    }
}

/// Tees writes into a file while hashing and counting the bytes.
struct HashingWriter {
    file: File,
    hasher: Sha256,
    written: u64,
}

impl HashingWriter {
    fn new(file: File) -> Self {
        Self {
            file,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn into_parts(self) -> (File, [u8; 32], u64) {
        (self.file, self.hasher.finalize().into(), self.written)
    }
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}
