// Path: crates/api/src/module.rs

//! The migrator module contract the block processor drives, plus the
//! snapshot and changeset capabilities it composes.

use crate::sql::{ChangesetChunk, Executor};
use async_trait::async_trait;
use meridian_types::chain::BlockContext;
use meridian_types::error::{MigrationError, SnapshotError, SqlError};
use meridian_types::migrations::{MigrationMetadata, MigrationStatus};
use std::io::Read;
use tokio::sync::mpsc;

/// Capacity of the bounded changeset channel between the database's
/// replication decoder and the migrator. The producer blocks on send when the
/// buffer is full, which in turn slows block execution; migration is an
/// exceptional mode, so that backpressure is acceptable.
pub const CHANGESET_CHANNEL_CAPACITY: usize = 16;

/// Receiving end of the per-block changeset handoff.
pub type ChangesetReceiver = mpsc::Receiver<ChangesetChunk>;

/// Builds the bounded changeset channel for one block.
pub fn changeset_channel() -> (mpsc::Sender<ChangesetChunk>, ChangesetReceiver) {
    mpsc::channel(CHANGESET_CHANNEL_CAPACITY)
}

/// Produces the deterministic logical dump of the database's user-visible
/// state: tables in a well-defined order, rows ordered by primary key,
/// system schemas excluded from data but present in schema.
#[async_trait]
pub trait SnapshotProducer: Send + Sync {
    /// Returns the logical dump of the state as the given transaction sees
    /// it. Two validators at the same committed state must produce
    /// byte-identical dumps. The dump completes before the enclosing block
    /// commit returns.
    async fn dump_state(&self, tx: &dyn Executor) -> Result<Vec<u8>, SnapshotError>;
}

/// Restores a logical dump into an uninitialized database, and prepares the
/// restored datasets for changeset replay.
#[async_trait]
pub trait SnapshotRestorer: Send + Sync {
    /// Applies the dump read from `input` to the local database. The database
    /// must be uninitialized; a partial restore must leave it untouched.
    fn restore(&self, input: &mut dyn Read) -> Result<(), SnapshotError>;

    /// Enables full replica identity on restored user datasets so the
    /// changesets replayed from the old network resolve rows unambiguously.
    async fn ensure_full_replica_identity(&self) -> Result<(), SqlError>;
}

/// Applies changeset bytes pulled from the old network onto the new
/// network's database during genesis migration.
#[async_trait]
pub trait ChangesetApplier: Send + Sync {
    /// Applies one block's worth of changeset bytes at the given old-chain
    /// height. Must be atomic per height.
    async fn apply_changeset(&self, height: i64, data: &[u8]) -> Result<(), SqlError>;
}

/// The interface the block processor holds on the migration subsystem. One
/// instance is owned by the node and passed explicitly; there is no ambient
/// global.
#[async_trait]
pub trait MigratorModule: Send + Sync {
    /// Drives the migration state machine for one committed block. Called
    /// exactly once per block, from within the commit transaction, before the
    /// block is final. Errors abort the commit.
    async fn notify_height(
        &self,
        block: &mut BlockContext<'_>,
        tx: &dyn Executor,
    ) -> Result<(), MigrationError>;

    /// Drains a block's changeset channel into per-height storage. Must be
    /// invoked concurrently with the database's precommit so the bounded
    /// channel never deadlocks; both complete before the commit returns.
    async fn store_changesets(
        &self,
        height: i64,
        changes: ChangesetReceiver,
    ) -> Result<(), MigrationError>;

    /// Records the highest height whose changeset is durably stored, inside
    /// the same transaction that commits the block.
    async fn persist_last_changeset_height(
        &self,
        tx: &dyn Executor,
        height: i64,
    ) -> Result<(), MigrationError>;

    /// Snapshot of the migration state for operators and for the new
    /// network's pull client.
    async fn get_migration_metadata(
        &self,
        status: MigrationStatus,
    ) -> Result<MigrationMetadata, MigrationError>;
}
