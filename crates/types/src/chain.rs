// Path: crates/types/src/chain.rs

//! Block and chain context carried through block execution. The consensus
//! engine constructs a [`BlockContext`] per committed block; the migration
//! subsystem and the mempool read (and, in the resolve callback, update) the
//! chain-level parameters through it.

use crate::migrations::MigrationStatus;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The migration window parameters exposed as chain parameters on a network
/// that was born out of a migration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct MigrationParams {
    /// First height of the window on the old chain.
    pub start_height: i64,
    /// Final height of the window on the old chain.
    pub end_height: i64,
}

/// Consensus-level network parameters. These are part of consensus state:
/// every validator must hold identical values at every height.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct NetworkParams {
    /// The phase of the active migration, if any.
    pub migration_status: MigrationStatus,
    /// Upper bound on resolution IDs per vote transaction.
    pub max_votes_per_tx: i64,
    /// When true, transactions are not charged gas and unfunded accounts are
    /// admitted to the mempool.
    pub disabled_gas_costs: bool,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            migration_status: MigrationStatus::NoActiveMigration,
            max_votes_per_tx: 100,
            disabled_gas_costs: true,
        }
    }
}

impl NetworkParams {
    /// Advances the migration status along the old-chain lifecycle.
    ///
    /// Forward transitions (including re-asserting the current phase) are
    /// accepted. A backward transition, or any transition into or out of
    /// `GenesisMigration` through this path, indicates consensus divergence
    /// and panics: such a state must never be committed.
    pub fn transition_migration_status(&mut self, next: MigrationStatus) {
        let cur = self.migration_status;
        if cur == next {
            return;
        }
        match (cur.phase_ordinal(), next.phase_ordinal()) {
            (Some(a), Some(b)) if b > a => {
                self.migration_status = next;
            }
            _ => panic!(
                "illegal migration status transition: {} -> {}; consensus state is diverged",
                cur, next
            ),
        }
    }

    /// Marks this node as a new-network member bootstrapping from a genesis
    /// snapshot. Only legal before any old-chain lifecycle phase was entered.
    pub fn enter_genesis_migration(&mut self) {
        assert_eq!(
            self.migration_status,
            MigrationStatus::NoActiveMigration,
            "genesis migration can only begin on a fresh network"
        );
        self.migration_status = MigrationStatus::GenesisMigration;
    }

    /// Called on the new network once the old chain's end height has been
    /// replayed; the network becomes autonomous.
    pub fn finish_genesis_sync(&mut self) {
        assert_eq!(
            self.migration_status,
            MigrationStatus::GenesisMigration,
            "finish_genesis_sync outside of genesis migration"
        );
        self.migration_status = MigrationStatus::NoActiveMigration;
    }
}

/// Chain-wide context shared by every block: the consensus parameters and,
/// on a migrated network, the window it was born from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct ChainContext {
    /// Consensus-level network parameters.
    pub network_params: NetworkParams,
    /// Set only on a network bootstrapping from a migration; `None` on the
    /// old chain. Its presence means this node is itself a migration child
    /// and must refuse to schedule another migration.
    pub migration_params: Option<MigrationParams>,
}

/// Per-block execution context handed to the migrator and the mempool.
#[derive(Debug)]
pub struct BlockContext<'a> {
    /// Height of the block being executed.
    pub height: i64,
    /// Unix timestamp (seconds) of the block.
    pub timestamp: u64,
    /// The shared chain context, mutable only within the consensus thread.
    pub chain: &'a mut ChainContext,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        let mut params = NetworkParams::default();
        params.transition_migration_status(MigrationStatus::ActivationPeriod);
        params.transition_migration_status(MigrationStatus::MigrationInProgress);
        params.transition_migration_status(MigrationStatus::MigrationCompleted);
        assert_eq!(
            params.migration_status,
            MigrationStatus::MigrationCompleted
        );
    }

    #[test]
    fn reasserting_current_phase_is_a_noop() {
        let mut params = NetworkParams::default();
        params.transition_migration_status(MigrationStatus::ActivationPeriod);
        params.transition_migration_status(MigrationStatus::ActivationPeriod);
        assert_eq!(params.migration_status, MigrationStatus::ActivationPeriod);
    }

    #[test]
    #[should_panic(expected = "illegal migration status transition")]
    fn backward_transition_panics() {
        let mut params = NetworkParams::default();
        params.transition_migration_status(MigrationStatus::MigrationInProgress);
        params.transition_migration_status(MigrationStatus::ActivationPeriod);
    }

    #[test]
    #[should_panic(expected = "illegal migration status transition")]
    fn genesis_migration_is_not_reachable_by_transition() {
        let mut params = NetworkParams::default();
        params.transition_migration_status(MigrationStatus::GenesisMigration);
    }

    #[test]
    fn genesis_sync_lifecycle() {
        let mut params = NetworkParams::default();
        params.enter_genesis_migration();
        assert_eq!(params.migration_status, MigrationStatus::GenesisMigration);
        params.finish_genesis_sync();
        assert_eq!(params.migration_status, MigrationStatus::NoActiveMigration);
    }
}
