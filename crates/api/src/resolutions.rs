// Path: crates/api/src/resolutions.rs

//! The resolution registry and vote-store contracts.
//!
//! The vote store itself is an external collaborator: it holds pending
//! resolutions, tallies validator power, and, when a resolution reaches its
//! kind's confirmation threshold, invokes the kind's registered resolve
//! handler from within the block commit transaction. The core only registers
//! kinds and supplies handlers.

use crate::sql::Executor;
use async_trait::async_trait;
use meridian_types::chain::BlockContext;
use meridian_types::error::{ResolutionError, SqlError};
use meridian_types::transaction::ResolutionId;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A pending entry in the vote store.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Content-addressed identifier.
    pub id: ResolutionId,
    /// The registered kind, e.g. `start_migration`.
    pub kind: String,
    /// The opaque voted payload.
    pub body: Vec<u8>,
    /// Total validator power that has approved so far.
    pub approved_power: i64,
    /// Unix nanoseconds after which votes are rejected.
    pub expiration: u64,
}

/// Static configuration of a resolution kind.
#[derive(Clone)]
pub struct ResolutionConfig {
    /// Confirmation threshold as a ratio of total validator power.
    /// Meeting the threshold requires `approved >= ceil(total * num / den)`,
    /// so ties round up to the next whole vote.
    pub confirmation_threshold: (u64, u64),
    /// Wall-clock lifetime of a pending resolution.
    pub expiration_period: Duration,
    /// The callback run when the threshold is met.
    pub handler: Arc<dyn ResolutionHandler>,
}

impl ResolutionConfig {
    /// Whether `approved` power meets the threshold against `total` power.
    pub fn threshold_met(&self, approved: i64, total: i64) -> bool {
        let (num, den) = self.confirmation_threshold;
        if total <= 0 {
            return false;
        }
        let required = (total as u128 * num as u128).div_ceil(den as u128);
        approved as u128 >= required
    }
}

/// The collaborators a resolve handler may touch. Everything here lives
/// inside the block commit transaction; the handler must not reach anything
/// else.
pub struct App<'a> {
    /// The block commit transaction.
    pub tx: &'a dyn Executor,
    /// The vote store, for reading and pruning pending resolutions.
    pub resolutions: &'a dyn ResolutionStore,
    /// Read access to the validator set.
    pub validators: &'a dyn ValidatorReader,
}

/// The callback invoked when a resolution of a registered kind passes.
#[async_trait]
pub trait ResolutionHandler: Send + Sync {
    /// Applies the passed resolution. Errors propagate to the block
    /// processor, which rejects the resolution; they never abort sibling
    /// transactions in the block.
    async fn resolve(
        &self,
        app: &App<'_>,
        resolution: &Resolution,
        block: &mut BlockContext<'_>,
    ) -> Result<(), ResolutionError>;
}

/// Read and prune access to the vote store's pending resolutions.
#[async_trait]
pub trait ResolutionStore: Send + Sync {
    /// Looks up a pending resolution by ID.
    async fn resolution_by_id(&self, id: ResolutionId) -> Result<Option<Resolution>, SqlError>;

    /// All pending resolutions of a kind, ordered by ascending serialized
    /// payload bytes (the same order threshold passage is processed in).
    async fn resolutions_by_kind(&self, kind: &str) -> Result<Vec<Resolution>, SqlError>;

    /// Deletes every pending resolution of a kind, returning how many were
    /// removed.
    async fn delete_resolutions_by_kind(&self, kind: &str) -> Result<u64, SqlError>;
}

/// Read access to the validator set and its voting power.
#[async_trait]
pub trait ValidatorReader: Send + Sync {
    /// The power of a single validator key; zero for non-validators.
    async fn validator_power(&self, pubkey: &[u8]) -> Result<i64, SqlError>;

    /// The total power of the current validator set.
    async fn total_power(&self) -> Result<i64, SqlError>;
}

/// The registry of resolution kinds, populated once at process init and
/// consulted by the vote store when tallying.
#[derive(Default)]
pub struct ResolutionRegistry {
    defs: BTreeMap<String, ResolutionConfig>,
}

impl ResolutionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolution kind. Registering the same kind twice is a
    /// wiring bug and is rejected.
    pub fn register_resolution(
        &mut self,
        kind: &str,
        config: ResolutionConfig,
    ) -> Result<(), ResolutionError> {
        if self.defs.contains_key(kind) {
            return Err(ResolutionError::AlreadyRegistered(kind.to_string()));
        }
        self.defs.insert(kind.to_string(), config);
        Ok(())
    }

    /// Looks up the configuration for a kind.
    pub fn get(&self, kind: &str) -> Result<&ResolutionConfig, ResolutionError> {
        self.defs
            .get(kind)
            .ok_or_else(|| ResolutionError::UnknownKind(kind.to_string()))
    }

    /// The registered kinds, in lexical order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }
}
