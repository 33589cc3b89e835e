// Path: crates/mempool/src/lib.rs
#![forbid(unsafe_code)]

//! Mempool admission checks for Meridian, including the migration policy
//! firewall.
//!
//! When the network is in a migration, there are numerous transaction kinds
//! that must be disallowed: once a migration is scheduled, only queries and
//! non-mutating operations are safe, and once it is in progress the old
//! chain must not diverge in state space the new chain re-derives from
//! changesets. The firewall is consulted before a transaction enters the
//! mempool; a rejected transaction is dropped and never gossiped.

use meridian_api::accounts::{Account, AccountReader};
use meridian_api::resolutions::{ResolutionStore, ValidatorReader};
use meridian_api::sql::Executor;
use meridian_types::chain::BlockContext;
use meridian_types::error::MempoolError;
use meridian_types::migrations::{MigrationStatus, START_MIGRATION_KIND};
use meridian_types::transaction::{Payload, PayloadKind, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The pure migration-policy predicate: is a transaction of this kind
/// admissible while the chain is in `status`?
///
/// Kind-independent rules only; the resolution-targeted rules (migration
/// proposals and their approvals) need payload inspection and live in
/// [`Mempool::apply_transaction`]. `ValidatorVoteBodies` is consensus
/// internal: it is only ever injected during block proposal and never enters
/// the mempool, in any phase.
pub fn allow(kind: PayloadKind, status: MigrationStatus) -> Result<(), MempoolError> {
    if kind == PayloadKind::ValidatorVoteBodies {
        return Err(MempoolError::VoteBodiesNotAllowed);
    }
    if status.in_migration() {
        match kind {
            PayloadKind::ValidatorJoin
            | PayloadKind::ValidatorLeave
            | PayloadKind::ValidatorApprove
            | PayloadKind::ValidatorRemove
            | PayloadKind::ValidatorVoteIds
            | PayloadKind::RawStatement
            | PayloadKind::Transfer => {
                return Err(MempoolError::DisallowedInMigration { kind });
            }
            _ => {}
        }
    }
    Ok(())
}

/// The mempool's migration-aware admission path. Tracks unconfirmed account
/// state so a sender's transactions chain their nonces and spends between
/// blocks; the tracked state is reset at the end of each block commit.
pub struct Mempool {
    account_reader: Arc<dyn AccountReader>,
    validators: Arc<dyn ValidatorReader>,
    resolutions: Arc<dyn ResolutionStore>,
    accounts: Mutex<HashMap<Vec<u8>, Account>>,
}

impl Mempool {
    /// Creates a mempool over the chain's account, validator, and resolution
    /// stores.
    pub fn new(
        account_reader: Arc<dyn AccountReader>,
        validators: Arc<dyn ValidatorReader>,
        resolutions: Arc<dyn ResolutionStore>,
    ) -> Self {
        Self {
            account_reader,
            validators,
            resolutions,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    /// Validates a transaction against the migration firewall and the
    /// account rules, and applies it to the unconfirmed mempool state.
    /// Returns the typed rejection if the transaction must be dropped.
    pub async fn apply_transaction(
        &self,
        block: &BlockContext<'_>,
        tx: &Transaction,
        dbtx: &dyn Executor,
    ) -> Result<(), MempoolError> {
        let params = &block.chain.network_params;
        let status = params.migration_status;
        // migration proposals and approvals are shut off from the moment a
        // migration is scheduled until well past its completion, and on the
        // new network while it bootstraps
        let no_new_migrations = status.is_active()
            || status.in_migration()
            || status == MigrationStatus::GenesisMigration;
        let kind = tx.body.payload.kind();

        allow(kind, status)?;

        if let Payload::CreateResolution(res) = &tx.body.payload {
            if no_new_migrations && res.kind == START_MIGRATION_KIND {
                return Err(MempoolError::DisallowedInMigration { kind });
            }
        }
        if let Payload::ApproveResolution(approve) = &tx.body.payload {
            let resolution = self
                .resolutions
                .resolution_by_id(approve.resolution_id)
                .await?
                .ok_or(MempoolError::ResolutionNotFound)?;
            if no_new_migrations && resolution.kind == START_MIGRATION_KIND {
                return Err(MempoolError::DisallowedInMigration { kind });
            }
        }

        if let Payload::ValidatorVoteIds(votes) = &tx.body.payload {
            let power = self.validators.validator_power(&tx.sender).await?;
            if power == 0 {
                return Err(MempoolError::NotAValidator);
            }
            let max = params.max_votes_per_tx;
            if votes.resolution_ids.len() as i64 > max {
                return Err(MempoolError::TooManyVotes {
                    got: votes.resolution_ids.len(),
                    max,
                });
            }
        }

        // the pending-state lock is never held across an await; the account
        // load happens outside it
        let cached = {
            let accounts = self.accounts.lock().expect("mempool accounts lock");
            accounts.get(&tx.sender).copied()
        };
        let acct = match cached {
            Some(acct) => acct,
            None => {
                self.account_reader
                    .get_account(dbtx, &tx.sender)
                    .await?
            }
        };

        // with gas enabled, unfunded fresh accounts cannot occupy the mempool
        if !params.disabled_gas_costs && acct.nonce == 0 && acct.balance == 0 {
            self.accounts
                .lock()
                .expect("mempool accounts lock")
                .remove(&tx.sender);
            return Err(MempoolError::InsufficientBalance);
        }

        if tx.body.nonce != acct.nonce + 1 {
            return Err(MempoolError::InvalidNonce {
                account: hex::encode(&tx.sender),
                got: tx.body.nonce,
                expected: acct.nonce + 1,
            });
        }

        let mut spend = tx.body.fee;
        if let Payload::Transfer(transfer) = &tx.body.payload {
            if transfer.amount < 0 {
                return Err(MempoolError::InvalidAmount);
            }
            if transfer.amount > acct.balance {
                return Err(MempoolError::InsufficientBalance);
            }
            spend += transfer.amount;
        }

        // track the pending spend, saturating at zero; execution settles the
        // exact amounts
        let pending = Account {
            balance: (acct.balance - spend).max(0),
            nonce: tx.body.nonce,
        };
        self.accounts
            .lock()
            .expect("mempool accounts lock")
            .insert(tx.sender.clone(), pending);

        tracing::debug!(
            target: "mempool",
            account = %hex::encode(&tx.sender),
            nonce = pending.nonce,
            "applied transaction to mempool state"
        );
        Ok(())
    }

    /// Clears the unconfirmed account state. Called at the end of each block
    /// commit.
    pub fn reset(&self) {
        self.accounts.lock().expect("mempool accounts lock").clear();
    }
}
