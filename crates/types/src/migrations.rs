// Path: crates/types/src/migrations.rs

//! Migration lifecycle types shared across the workspace: the voted
//! [`MigrationDeclaration`] and its fixed wire codec, the phase enum
//! [`MigrationStatus`], the persisted [`ActiveMigration`] record, and the
//! [`MigrationMetadata`] served to joining nodes over the pull API.

use crate::error::CodecError;
use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Version of the migration metadata format.
pub const MIGRATION_VERSION: u16 = 0;

/// The resolution kind validators vote on to schedule a migration. Lives in
/// the base crate because both the resolution integration and the mempool
/// firewall key on it.
pub const START_MIGRATION_KIND: &str = "start_migration";

/// Version word leading every serialized [`MigrationDeclaration`].
const DECLARATION_VERSION: u16 = 0;

/// The phase of a network migration, tracked as a consensus-level chain
/// parameter. Phases of the old-chain lifecycle only ever move forward; a
/// backward transition indicates consensus divergence and is fatal.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Default, Hash,
)]
pub enum MigrationStatus {
    /// No migration has been scheduled.
    #[default]
    NoActiveMigration,
    /// A migration resolution has passed; the chain is waiting for the start
    /// height so validators can prepare.
    ActivationPeriod,
    /// The migration window is open: every committed block's changeset is
    /// captured and forwarded to the new network.
    MigrationInProgress,
    /// The old chain has reached its end height and halts block production.
    MigrationCompleted,
    /// This node is a member of the *new* network, bootstrapping from a
    /// genesis snapshot and replaying changesets from the old network.
    GenesisMigration,
}

impl MigrationStatus {
    /// True while a migration is scheduled or running on the old chain
    /// (`ActivationPeriod` or `MigrationInProgress`).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MigrationStatus::ActivationPeriod | MigrationStatus::MigrationInProgress
        )
    }

    /// True once the migration window has opened on the old chain
    /// (`MigrationInProgress` or `MigrationCompleted`).
    pub fn in_migration(&self) -> bool {
        matches!(
            self,
            MigrationStatus::MigrationInProgress | MigrationStatus::MigrationCompleted
        )
    }

    /// Position of this status in the old-chain lifecycle, or `None` for
    /// [`MigrationStatus::GenesisMigration`], which is a boot mode of the new
    /// network rather than a lifecycle phase.
    pub fn phase_ordinal(&self) -> Option<u8> {
        match self {
            MigrationStatus::NoActiveMigration => Some(0),
            MigrationStatus::ActivationPeriod => Some(1),
            MigrationStatus::MigrationInProgress => Some(2),
            MigrationStatus::MigrationCompleted => Some(3),
            MigrationStatus::GenesisMigration => None,
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationStatus::NoActiveMigration => "NoActiveMigration",
            MigrationStatus::ActivationPeriod => "ActivationPeriod",
            MigrationStatus::MigrationInProgress => "MigrationInProgress",
            MigrationStatus::MigrationCompleted => "MigrationCompleted",
            MigrationStatus::GenesisMigration => "GenesisMigration",
        };
        f.write_str(s)
    }
}

/// The voted document defining the terms of a migration. It is used to agree
/// on terms of a migration and is voted on through the resolution store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct MigrationDeclaration {
    /// The number of blocks between resolution passage and migration start.
    /// The intention is to allow validators to prepare for the migration.
    pub activation_period: u64,
    /// The number of blocks the migration window stays open.
    pub duration: u64,
    /// Creator-supplied timestamp. Its only purpose is to guarantee
    /// uniqueness of the serialized declaration, since the resolution store
    /// deduplicates proposals by content.
    pub timestamp: String,
}

impl MigrationDeclaration {
    /// Serializes the declaration into its fixed wire form:
    /// `u16 version ‖ u64 activation_period ‖ u64 duration ‖ u32 len ‖ timestamp`,
    /// all little-endian fixed width. The layout must match across the
    /// network byte for byte, so SCALE is not used here.
    pub fn encode(&self) -> Vec<u8> {
        let ts = self.timestamp.as_bytes();
        let mut buf = Vec::with_capacity(2 + 8 + 8 + 4 + ts.len());
        buf.extend_from_slice(&DECLARATION_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.activation_period.to_le_bytes());
        buf.extend_from_slice(&self.duration.to_le_bytes());
        buf.extend_from_slice(&(ts.len() as u32).to_le_bytes());
        buf.extend_from_slice(ts);
        buf
    }

    /// Deserializes a declaration from its wire form. The codec is bijective
    /// on valid inputs: every accepted payload re-encodes to the same bytes.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut rd = FieldReader::new(data);

        let version = u16::from_le_bytes(rd.take::<2>("version")?);
        if version != DECLARATION_VERSION {
            return Err(CodecError::UnknownVersion { got: version });
        }

        let activation_period = u64::from_le_bytes(rd.take::<8>("activation_period")?);
        let duration = u64::from_le_bytes(rd.take::<8>("duration")?);

        let ts_len = u32::from_le_bytes(rd.take::<4>("timestamp length")?) as usize;
        let ts_bytes = rd.take_slice("timestamp", ts_len)?;
        let timestamp = String::from_utf8(ts_bytes.to_vec())
            .map_err(|_| CodecError::InvalidUtf8 { field: "timestamp" })?;

        rd.finish()?;

        Ok(MigrationDeclaration {
            activation_period,
            duration,
            timestamp,
        })
    }
}

/// Cursor over a declaration payload that reports which field was truncated.
struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], CodecError> {
        let bytes = self.take_slice(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take_slice(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::Truncated { field })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn finish(&self) -> Result<(), CodecError> {
        let remaining = self.data.len() - self.pos;
        if remaining != 0 {
            return Err(CodecError::TrailingBytes { remaining });
        }
        Ok(())
    }
}

/// The single persisted record describing a scheduled or running migration.
/// Created by the resolution callback and never mutated afterwards; it is
/// removed only when a fresh genesis bootstraps the new network.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ActiveMigration {
    /// First height of the migration window.
    pub start_height: i64,
    /// Height at which the old chain halts. Always greater than `start_height`.
    pub end_height: i64,
}

impl ActiveMigration {
    /// Builds a record, enforcing `end_height > start_height`.
    pub fn new(start_height: i64, end_height: i64) -> Result<Self, crate::error::MigrationError> {
        if end_height <= start_height {
            return Err(crate::error::MigrationError::InvalidWindow {
                start_height,
                end_height,
            });
        }
        Ok(Self {
            start_height,
            end_height,
        })
    }
}

/// Snapshot of the migration state served to the new network over the pull
/// API, and to operators over RPC.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct MigrationMetadata {
    /// The old chain's current migration phase.
    pub status: MigrationStatus,
    /// First height of the migration window, or 0 when no migration exists.
    pub start_height: i64,
    /// Final height of the migration window, or 0 when no migration exists.
    pub end_height: i64,
    /// SHA-256 of the compressed genesis snapshot, once produced. This is the
    /// `state_hash` the new network must carry in its genesis config.
    pub genesis_hash: Option<[u8; 32]>,
    /// Size in bytes of the compressed genesis snapshot, once produced.
    pub snapshot_size: u64,
    /// Highest block height whose changeset has been durably stored.
    pub last_changeset_height: i64,
}
