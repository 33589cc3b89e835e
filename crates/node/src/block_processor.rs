// Path: crates/node/src/block_processor.rs

//! The single call site between block execution and the migration subsystem.
//!
//! The consensus engine executes a block's transactions into the outer
//! commit transaction, then hands that transaction to
//! [`BlockProcessor::seal_block`]. Everything the migrator does (phase
//! transitions, the genesis snapshot, changeset capture, the watermark)
//! happens inside that transaction, before the block is marked final, so
//! changeset persistence and block finalization are atomic. Any error aborts
//! the commit and consensus re-executes the block.

use meridian_api::module::{changeset_channel, MigratorModule};
use meridian_api::sql::{CommitTx, Database};
use meridian_mempool::Mempool;
use meridian_types::chain::{BlockContext, ChainContext};
use meridian_types::error::{MempoolError, MigrationError, SqlError};
use meridian_types::migrations::MigrationStatus;
use meridian_types::transaction::Transaction;
use std::sync::Arc;
use tokio::sync::watch;

/// Drives block commits through the migration subsystem. One instance per
/// node, owned by the consensus loop; nothing here is a process-wide global.
pub struct BlockProcessor {
    db: Arc<dyn Database>,
    migrator: Arc<dyn MigratorModule>,
    mempool: Arc<Mempool>,
    chain: ChainContext,
    status_out: watch::Sender<MigrationStatus>,
    height: i64,
}

impl BlockProcessor {
    /// Creates the processor over the node's database, migrator, and
    /// mempool, starting from `chain` at `height`. `status_out` republishes
    /// the migration status to read paths (the RPC layer) after each block.
    pub fn new(
        db: Arc<dyn Database>,
        migrator: Arc<dyn MigratorModule>,
        mempool: Arc<Mempool>,
        chain: ChainContext,
        height: i64,
        status_out: watch::Sender<MigrationStatus>,
    ) -> Self {
        let _ = status_out.send(chain.network_params.migration_status);
        Self {
            db,
            migrator,
            mempool,
            chain,
            status_out,
            height,
        }
    }

    /// The chain context as of the last committed block.
    pub fn chain(&self) -> &ChainContext {
        &self.chain
    }

    /// Mutable access to the chain context for the execution engine while it
    /// executes a block's transactions (resolution passage mutates the
    /// migration status). Only the consensus thread may hold this.
    pub fn chain_mut(&mut self) -> &mut ChainContext {
        &mut self.chain
    }

    /// Height of the last committed block.
    pub fn height(&self) -> i64 {
        self.height
    }

    /// Whether consensus may propose another block. Once the migration
    /// completes, the old network refuses to extend the chain.
    pub fn ready_to_propose(&self) -> bool {
        self.chain.network_params.migration_status != MigrationStatus::MigrationCompleted
    }

    /// Mempool admission check for one transaction, run against a
    /// snapshot-isolated read transaction.
    pub async fn check_transaction(&mut self, tx: &Transaction) -> Result<(), MempoolError> {
        let read_tx = self.db.begin_read_tx().await?;
        let block = BlockContext {
            height: self.height,
            timestamp: 0,
            chain: &mut self.chain,
        };
        self.mempool.apply_transaction(&block, tx, read_tx.as_ref()).await
    }

    /// Begins the outer commit transaction for the next block. The caller
    /// executes the block's transactions against it, then seals it.
    pub async fn begin_block(&self) -> Result<Box<dyn CommitTx>, SqlError> {
        self.db.begin_commit_tx().await
    }

    /// Finishes a block: runs the migrator inside the commit transaction,
    /// captures the block's changeset when the migration window is open, and
    /// commits. On error the transaction is rolled back and the error
    /// propagates; nothing of the block survives.
    pub async fn seal_block(
        &mut self,
        height: i64,
        timestamp: u64,
        tx: Box<dyn CommitTx>,
    ) -> Result<(), MigrationError> {
        assert_eq!(height, self.height + 1, "blocks must be sealed in order");

        if let Err(e) = self.seal_inner(height, timestamp, tx.as_ref()).await {
            let _ = tx.rollback().await;
            return Err(e);
        }

        tx.commit().await.map_err(MigrationError::Sql)?;
        self.height = height;
        self.mempool.reset();
        let _ = self
            .status_out
            .send(self.chain.network_params.migration_status);
        Ok(())
    }

    async fn seal_inner(
        &mut self,
        height: i64,
        timestamp: u64,
        tx: &dyn CommitTx,
    ) -> Result<(), MigrationError> {
        {
            let mut block = BlockContext {
                height,
                timestamp,
                chain: &mut self.chain,
            };
            self.migrator.notify_height(&mut block, tx).await?;
        }

        if self.chain.network_params.migration_status == MigrationStatus::MigrationInProgress {
            // the database streams this block's changeset while the migrator
            // drains it into per-height storage; the bounded channel
            // backpressures block execution rather than buffering unbounded
            let (sender, receiver) = changeset_channel();
            let (precommitted, stored) = tokio::join!(
                tx.precommit(Some(sender)),
                self.migrator.store_changesets(height, receiver)
            );
            let _commit_id = precommitted.map_err(MigrationError::Sql)?;
            stored?;
            self.migrator.persist_last_changeset_height(tx, height).await?;
        } else {
            tx.precommit(None).await.map_err(MigrationError::Sql)?;
        }

        Ok(())
    }
}
