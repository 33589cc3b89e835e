// Path: crates/api/src/sql.rs

//! SQL executor and transaction bundles.
//!
//! The concrete database is an external collaborator; the migration core only
//! ever sees these contracts. All consensus-critical queries run from within
//! the single block-commit transaction ([`CommitTx`]); read paths acquire
//! snapshot-isolated read transactions that never block the writer.

use async_trait::async_trait;
use meridian_types::error::SqlError;
use tokio::sync::mpsc;

/// A single SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// An 8-byte signed integer.
    Int(i64),
    /// A text value.
    Text(String),
    /// A byte array.
    Bytea(Vec<u8>),
    /// A boolean.
    Bool(bool),
}

impl SqlValue {
    /// Extracts an integer, or reports a decode error naming the column.
    pub fn as_int(&self, column: &str) -> Result<i64, SqlError> {
        match self {
            SqlValue::Int(v) => Ok(*v),
            other => Err(SqlError::Decode(format!(
                "column {} is not an int: {:?}",
                column, other
            ))),
        }
    }
}

/// The shape of a query result: column names plus rows of cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    /// Column names, in select order.
    pub columns: Vec<String>,
    /// Result rows.
    pub rows: Vec<Vec<SqlValue>>,
}

/// Anything statements can be executed against: the database itself, a
/// commit transaction, or a read transaction.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a statement with positional `$n` arguments.
    async fn execute(&self, stmt: &str, args: &[SqlValue]) -> Result<ResultSet, SqlError>;
}

/// A chunk of opaque changeset bytes produced by the database's logical
/// replication decoder during precommit.
pub type ChangesetChunk = Vec<u8>;

/// The outer two-phase write transaction a block commits through.
///
/// `precommit` flushes the session's writes to the WAL and, when a sender is
/// supplied, streams the block's changeset through it; the channel is bounded,
/// so the database blocks on send until the consumer drains. Both phases must
/// complete before `commit` seals the block.
#[async_trait]
pub trait CommitTx: Executor {
    /// Finishes the write phase and streams the logical changeset of this
    /// transaction, returning the commit identifier.
    async fn precommit(
        &self,
        changes: Option<mpsc::Sender<ChangesetChunk>>,
    ) -> Result<Vec<u8>, SqlError>;

    /// Makes the transaction durable. After this returns, the block and
    /// everything written within its transaction exist; before it, nothing
    /// does.
    async fn commit(self: Box<Self>) -> Result<(), SqlError>;

    /// Discards the transaction.
    async fn rollback(self: Box<Self>) -> Result<(), SqlError>;
}

/// A snapshot-isolated read-only transaction. Dropping it releases the
/// snapshot.
pub trait ReadTx: Executor {}

/// Creates the special outer write transaction for block commits.
#[async_trait]
pub trait TxMaker: Send + Sync {
    /// Begins the block-commit transaction. Only one may exist at a time.
    async fn begin_commit_tx(&self) -> Result<Box<dyn CommitTx>, SqlError>;
}

/// Creates snapshot-isolated read transactions for query paths.
#[async_trait]
pub trait ReadTxMaker: Send + Sync {
    /// Begins a read transaction pinned to the latest committed snapshot.
    async fn begin_read_tx(&self) -> Result<Box<dyn ReadTx>, SqlError>;
}

/// The capability bundle the block processor and the migration subsystem
/// require of the main database.
pub trait Database: TxMaker + ReadTxMaker + Executor {}
impl<T: TxMaker + ReadTxMaker + Executor> Database for T {}
