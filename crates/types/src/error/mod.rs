// Path: crates/types/src/error/mod.rs
//! Core error types for the Meridian migration subsystem.

use crate::transaction::PayloadKind;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors produced by the fixed-layout declaration codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The leading version word is not a version this node understands.
    #[error("unknown declaration version: {got}")]
    UnknownVersion {
        /// The version word found on the wire.
        got: u16,
    },
    /// A field could not be fully read from the payload.
    #[error("payload truncated while reading {field}")]
    Truncated {
        /// The field being read when the payload ran out.
        field: &'static str,
    },
    /// Unread bytes remained after the final field.
    #[error("{remaining} trailing bytes after declaration payload")]
    TrailingBytes {
        /// How many bytes were left unread.
        remaining: usize,
    },
    /// A string field did not contain valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// The offending field.
        field: &'static str,
    },
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownVersion { .. } => "CODEC_UNKNOWN_VERSION",
            Self::Truncated { .. } => "CODEC_TRUNCATED",
            Self::TrailingBytes { .. } => "CODEC_TRAILING_BYTES",
            Self::InvalidUtf8 { .. } => "CODEC_INVALID_UTF8",
        }
    }
}

/// Errors from the SQL abstraction layer. The concrete database lives outside
/// this workspace; these are the shapes its failures surface as.
#[derive(Debug, Error)]
pub enum SqlError {
    /// A generic error originating from the database backend.
    #[error("sql backend error: {0}")]
    Backend(String),
    /// The statement targeted a row that does not exist.
    #[error("row not found")]
    NotFound,
    /// A uniqueness constraint rejected the write.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// A stored value could not be decoded into its expected shape.
    #[error("sql decode error: {0}")]
    Decode(String),
}

impl ErrorCode for SqlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Backend(_) => "SQL_BACKEND_ERROR",
            Self::NotFound => "SQL_NOT_FOUND",
            Self::AlreadyExists(_) => "SQL_ALREADY_EXISTS",
            Self::Decode(_) => "SQL_DECODE_ERROR",
        }
    }
}

/// Errors from the append-only per-height changeset store.
#[derive(Debug, Error)]
pub enum ChangesetStoreError {
    /// No committed changeset exists for the requested height.
    #[error("no committed changeset for height {height}")]
    NotFound {
        /// The requested height.
        height: i64,
    },
    /// The height is inside the migration window but its changeset has not
    /// been committed yet.
    #[error("changeset for height {height} is not yet available")]
    NotReady {
        /// The requested height.
        height: i64,
    },
    /// An I/O failure while writing or reading chunk files. Surfacing this
    /// aborts the enclosing block commit.
    #[error("changeset io error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk layout is inconsistent (bad chunk name, missing chunk).
    #[error("corrupt changeset directory: {0}")]
    Corrupt(String),
}

impl ErrorCode for ChangesetStoreError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "CHANGESET_NOT_FOUND",
            Self::NotReady { .. } => "CHANGESET_NOT_READY",
            Self::Io(_) => "CHANGESET_IO_ERROR",
            Self::Corrupt(_) => "CHANGESET_CORRUPT",
        }
    }
}

/// Errors from genesis snapshot production and consumption.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The genesis config carries a state hash but no snapshot file exists.
    #[error("snapshot file not provided")]
    NotProvided,
    /// The snapshot file's hash does not match the configured state hash.
    /// Fatal at boot: the node must not start from unverified state.
    #[error("snapshot hash mismatch: expected {expected}, got {got}")]
    HashMismatch {
        /// Hex of the hash the genesis config demands.
        expected: String,
        /// Hex of the hash the file actually has.
        got: String,
    },
    /// The logical dump producer failed.
    #[error("snapshot producer failed: {0}")]
    Producer(String),
    /// Restoring the dump into the local database failed.
    #[error("snapshot restore failed: {0}")]
    Restore(String),
    /// An I/O failure while reading or writing the snapshot file.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorCode for SnapshotError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotProvided => "SNAPSHOT_NOT_PROVIDED",
            Self::HashMismatch { .. } => "SNAPSHOT_HASH_MISMATCH",
            Self::Producer(_) => "SNAPSHOT_PRODUCER_FAILED",
            Self::Restore(_) => "SNAPSHOT_RESTORE_FAILED",
            Self::Io(_) => "SNAPSHOT_IO_ERROR",
        }
    }
}

/// Errors from the resolution store integration.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// A resolution kind was registered twice.
    #[error("resolution kind already registered: {0}")]
    AlreadyRegistered(String),
    /// A resolution referenced a kind with no registered handler.
    #[error("unknown resolution kind: {0}")]
    UnknownKind(String),
    /// The resolution body could not be decoded as a declaration.
    #[error("invalid resolution payload: {0}")]
    Decode(#[from] CodecError),
    /// A migration resolution passed while the chain is already migrating.
    #[error("migration already active")]
    AlreadyMigrating,
    /// The migration state store already holds an active record.
    #[error("only one migration can be active at a time")]
    ActiveMigrationExists,
    /// Deriving the start or end height overflowed `i64`.
    #[error("migration window overflows the chain height range")]
    HeightOverflow,
    /// A vote arrived after the resolution's expiration.
    #[error("resolution expired")]
    Expired,
    /// The declaration's fields are outside their allowed ranges.
    #[error("invalid migration declaration: {0}")]
    InvalidDeclaration(String),
    /// A state access inside the resolve callback failed.
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),
}

impl ErrorCode for ResolutionError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "RESOLUTION_ALREADY_REGISTERED",
            Self::UnknownKind(_) => "RESOLUTION_UNKNOWN_KIND",
            Self::Decode(_) => "RESOLUTION_DECODE_ERROR",
            Self::AlreadyMigrating => "RESOLUTION_ALREADY_MIGRATING",
            Self::ActiveMigrationExists => "RESOLUTION_MIGRATION_EXISTS",
            Self::HeightOverflow => "RESOLUTION_HEIGHT_OVERFLOW",
            Self::Expired => "RESOLUTION_EXPIRED",
            Self::InvalidDeclaration(_) => "RESOLUTION_INVALID_DECLARATION",
            Self::Sql(_) => "RESOLUTION_SQL_ERROR",
        }
    }
}

/// Errors from the migration orchestrator.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Shorthand for the duplicate-proposal operator error.
    #[error("migration already active")]
    AlreadyActive,
    /// `end_height` must be strictly greater than `start_height`.
    #[error("invalid migration window: start {start_height}, end {end_height}")]
    InvalidWindow {
        /// Proposed start height.
        start_height: i64,
        /// Proposed end height.
        end_height: i64,
    },
    /// An error from the changeset store. Aborts the block commit.
    #[error("changeset store error: {0}")]
    Changesets(#[from] ChangesetStoreError),
    /// An error from the migration state store.
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),
    /// An error producing or verifying the genesis snapshot.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    /// An error from the resolution integration.
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),
    /// A canonical codec failure on persisted migration state.
    #[error("codec error: {0}")]
    Codec(String),
    /// A failure in the pull client while syncing changesets from the old
    /// network.
    #[error("changeset sync error: {0}")]
    Sync(String),
}

impl ErrorCode for MigrationError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyActive => "MIGRATION_ALREADY_ACTIVE",
            Self::InvalidWindow { .. } => "MIGRATION_INVALID_WINDOW",
            Self::Changesets(_) => "MIGRATION_CHANGESET_ERROR",
            Self::Sql(_) => "MIGRATION_SQL_ERROR",
            Self::Snapshot(_) => "MIGRATION_SNAPSHOT_ERROR",
            Self::Resolution(_) => "MIGRATION_RESOLUTION_ERROR",
            Self::Codec(_) => "MIGRATION_CODEC_ERROR",
            Self::Sync(_) => "MIGRATION_SYNC_ERROR",
        }
    }
}

/// Errors surfaced by the mempool admission path, including the migration
/// policy firewall.
#[derive(Debug, Error)]
pub enum MempoolError {
    /// The transaction kind is not allowed in the current migration phase.
    /// The transaction is dropped and never gossiped.
    #[error("transaction kind disallowed during migration: {kind}")]
    DisallowedInMigration {
        /// The rejected payload kind.
        kind: PayloadKind,
    },
    /// Vote-body payloads are consensus-internal and can only be injected
    /// during block proposal; they never enter the mempool.
    #[error("validator vote bodies can not enter the mempool, and can only be submitted during block proposal")]
    VoteBodiesNotAllowed,
    /// The transaction nonce does not extend the account's pending sequence.
    #[error("invalid nonce for account {account}: got {got}, expected {expected}")]
    InvalidNonce {
        /// Hex of the sender identifier.
        account: String,
        /// The nonce carried by the transaction.
        got: u64,
        /// The nonce the mempool expected next.
        expected: u64,
    },
    /// The sender cannot fund the transfer (or, with gas enabled, has no
    /// balance at all).
    #[error("insufficient balance")]
    InsufficientBalance,
    /// A transfer carried a negative amount.
    #[error("negative transfer not permitted")]
    InvalidAmount,
    /// Only validators may submit validator vote transactions.
    #[error("only validators can submit validator vote transactions")]
    NotAValidator,
    /// A vote-IDs payload exceeded the per-transaction bound.
    #[error("number of vote ids exceeds the limit of {max}")]
    TooManyVotes {
        /// Number of vote IDs in the payload.
        got: usize,
        /// The chain's configured bound.
        max: i64,
    },
    /// The referenced resolution does not exist.
    #[error("migration proposal not found")]
    ResolutionNotFound,
    /// A payload failed to deserialize during admission checks.
    #[error("payload decode error: {0}")]
    Decode(String),
    /// A state read during admission failed.
    #[error("sql error: {0}")]
    Sql(#[from] SqlError),
}

impl ErrorCode for MempoolError {
    fn code(&self) -> &'static str {
        match self {
            Self::DisallowedInMigration { .. } => "MEMPOOL_DISALLOWED_IN_MIGRATION",
            Self::VoteBodiesNotAllowed => "MEMPOOL_VOTE_BODIES_NOT_ALLOWED",
            Self::InvalidNonce { .. } => "MEMPOOL_INVALID_NONCE",
            Self::InsufficientBalance => "MEMPOOL_INSUFFICIENT_BALANCE",
            Self::InvalidAmount => "MEMPOOL_INVALID_AMOUNT",
            Self::NotAValidator => "MEMPOOL_NOT_A_VALIDATOR",
            Self::TooManyVotes { .. } => "MEMPOOL_TOO_MANY_VOTES",
            Self::ResolutionNotFound => "MEMPOOL_RESOLUTION_NOT_FOUND",
            Self::Decode(_) => "MEMPOOL_DECODE_ERROR",
            Self::Sql(_) => "MEMPOOL_SQL_ERROR",
        }
    }
}

/// Errors from the validator workflow, surfaced through transaction execution.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// An approval targeted a candidate with no pending join request.
    #[error("No active join request for that validator")]
    NoActiveJoinRequest,
    /// The submitting key is not part of the validator set.
    #[error("signer is not a validator")]
    NotAValidator,
}

impl ErrorCode for ValidatorError {
    fn code(&self) -> &'static str {
        match self {
            Self::NoActiveJoinRequest => "VALIDATOR_NO_ACTIVE_JOIN_REQUEST",
            Self::NotAValidator => "VALIDATOR_NOT_A_VALIDATOR",
        }
    }
}
