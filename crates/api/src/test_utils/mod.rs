// Path: crates/api/src/test_utils/mod.rs

//! In-memory doubles for the external collaborators: the SQL database, the
//! vote store, the validator store, and the snapshot producer/restorer.
//!
//! These are fixtures for the workspace test suites. They implement the
//! contracts in this crate faithfully enough to exercise the migration core
//! end to end: the database double understands the handful of statement
//! shapes the migration state store issues and treats every other mutating
//! statement as an opaque user write, which also feeds its synthetic
//! changeset stream.

use crate::accounts::{Account, AccountReader};
use crate::module::{SnapshotProducer, SnapshotRestorer};
use crate::resolutions::{
    App, Resolution, ResolutionConfig, ResolutionRegistry, ResolutionStore, ValidatorReader,
};
use crate::sql::{
    ChangesetChunk, CommitTx, Executor, ReadTx, ReadTxMaker, ResultSet, SqlValue, TxMaker,
};
use async_trait::async_trait;
use meridian_types::chain::BlockContext;
use meridian_types::error::{ResolutionError, SnapshotError, SqlError};
use meridian_types::transaction::ResolutionId;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The logical state held by [`MemDatabase`].
#[derive(Debug, Clone, Default)]
pub struct MemState {
    /// Schemas created so far; drives the `information_schema` existence check.
    pub schemas: BTreeSet<String>,
    /// The single active-migration row, if present.
    pub active_migration: Option<(i64, i64)>,
    /// The last-changeset-height watermark row, if present.
    pub last_changeset_height: Option<i64>,
    /// Opaque user writes, in execution order.
    pub user_writes: Vec<String>,
}

/// An in-memory stand-in for the main SQL database.
#[derive(Debug, Default)]
pub struct MemDatabase {
    committed: Arc<Mutex<MemState>>,
}

impl MemDatabase {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the committed state, for assertions and for the snapshot
    /// producer.
    pub fn committed_state(&self) -> MemState {
        self.committed.lock().expect("mem db lock").clone()
    }

    fn render_write(stmt: &str, args: &[SqlValue]) -> String {
        let mut line = stmt.trim().to_string();
        for (i, arg) in args.iter().enumerate() {
            line.push_str(&format!(" ${}={:?}", i + 1, arg));
        }
        line
    }

    /// Applies one statement to `state`, returning the result set and whether
    /// the statement mutated anything.
    fn apply(
        state: &mut MemState,
        stmt: &str,
        args: &[SqlValue],
    ) -> Result<(ResultSet, bool), SqlError> {
        let trimmed = stmt.trim();
        let upper = trimmed.to_ascii_uppercase();

        if trimmed.contains("information_schema.schemata") {
            let name = match args.first() {
                Some(SqlValue::Text(s)) => s.clone(),
                _ => {
                    return Err(SqlError::Decode(
                        "schema existence check expects a text argument".into(),
                    ))
                }
            };
            let rows = if state.schemas.contains(&name) {
                vec![vec![SqlValue::Int(1)]]
            } else {
                vec![]
            };
            return Ok((
                ResultSet {
                    columns: vec!["?column?".into()],
                    rows,
                },
                false,
            ));
        }

        if upper.starts_with("CREATE SCHEMA IF NOT EXISTS") {
            let name = trimmed
                .rsplit(|c: char| c.is_whitespace())
                .next()
                .unwrap_or_default()
                .trim_end_matches(';');
            state.schemas.insert(name.to_string());
            return Ok((ResultSet::default(), true));
        }

        if upper.starts_with("CREATE TABLE") {
            return Ok((ResultSet::default(), true));
        }

        if trimmed.contains("meridian_migrations.active") {
            if upper.starts_with("INSERT") {
                if state.active_migration.is_none() {
                    let start = args
                        .first()
                        .ok_or(SqlError::Decode("missing start_height".into()))?
                        .as_int("start_height")?;
                    let end = args
                        .get(1)
                        .ok_or(SqlError::Decode("missing end_height".into()))?
                        .as_int("end_height")?;
                    state.active_migration = Some((start, end));
                    return Ok((ResultSet::default(), true));
                }
                // the store issues ON CONFLICT DO NOTHING
                if upper.contains("ON CONFLICT") {
                    return Ok((ResultSet::default(), false));
                }
                return Err(SqlError::AlreadyExists("active migration".into()));
            }
            if upper.starts_with("SELECT") {
                let rows = state
                    .active_migration
                    .map(|(s, e)| vec![vec![SqlValue::Int(s), SqlValue::Int(e)]])
                    .unwrap_or_default();
                return Ok((
                    ResultSet {
                        columns: vec!["start_height".into(), "end_height".into()],
                        rows,
                    },
                    false,
                ));
            }
            if upper.starts_with("DELETE") {
                state.active_migration = None;
                return Ok((ResultSet::default(), true));
            }
        }

        if trimmed.contains("meridian_migrations.last_changeset") {
            if upper.starts_with("INSERT") {
                let height = args
                    .first()
                    .ok_or(SqlError::Decode("missing height".into()))?
                    .as_int("height")?;
                state.last_changeset_height = Some(height);
                return Ok((ResultSet::default(), true));
            }
            if upper.starts_with("SELECT") {
                let rows = state
                    .last_changeset_height
                    .map(|h| vec![vec![SqlValue::Int(h)]])
                    .unwrap_or_default();
                return Ok((
                    ResultSet {
                        columns: vec!["height".into()],
                        rows,
                    },
                    false,
                ));
            }
        }

        if upper.starts_with("SELECT") {
            return Ok((ResultSet::default(), false));
        }

        // anything else is an opaque user write
        state.user_writes.push(Self::render_write(stmt, args));
        Ok((ResultSet::default(), true))
    }
}

#[async_trait]
impl Executor for MemDatabase {
    async fn execute(&self, stmt: &str, args: &[SqlValue]) -> Result<ResultSet, SqlError> {
        let mut state = self.committed.lock().expect("mem db lock");
        Self::apply(&mut state, stmt, args).map(|(rs, _)| rs)
    }
}

/// A commit transaction over [`MemDatabase`]: statements run against a staged
/// copy, mutations feed the synthetic changeset stream, and `commit` swaps
/// the staged copy in atomically.
pub struct MemCommitTx {
    committed: Arc<Mutex<MemState>>,
    staged: Mutex<MemState>,
    changes: Mutex<Vec<ChangesetChunk>>,
}

#[async_trait]
impl Executor for MemCommitTx {
    async fn execute(&self, stmt: &str, args: &[SqlValue]) -> Result<ResultSet, SqlError> {
        let mut staged = self.staged.lock().expect("staged lock");
        let (rs, mutated) = MemDatabase::apply(&mut staged, stmt, args)?;
        if mutated {
            self.changes
                .lock()
                .expect("changes lock")
                .push(MemDatabase::render_write(stmt, args).into_bytes());
        }
        Ok(rs)
    }
}

#[async_trait]
impl CommitTx for MemCommitTx {
    async fn precommit(
        &self,
        changes: Option<mpsc::Sender<ChangesetChunk>>,
    ) -> Result<Vec<u8>, SqlError> {
        if let Some(sender) = changes {
            let recorded: Vec<ChangesetChunk> =
                self.changes.lock().expect("changes lock").clone();
            for chunk in recorded {
                // the bounded channel provides the backpressure the real
                // replication decoder experiences
                sender
                    .send(chunk)
                    .await
                    .map_err(|_| SqlError::Backend("changeset receiver dropped".into()))?;
            }
        }
        Ok(b"commit-id".to_vec())
    }

    async fn commit(self: Box<Self>) -> Result<(), SqlError> {
        let staged = self.staged.lock().expect("staged lock").clone();
        *self.committed.lock().expect("mem db lock") = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SqlError> {
        Ok(())
    }
}

/// A snapshot-isolated read transaction over [`MemDatabase`].
pub struct MemReadTx {
    snapshot: Mutex<MemState>,
}

#[async_trait]
impl Executor for MemReadTx {
    async fn execute(&self, stmt: &str, args: &[SqlValue]) -> Result<ResultSet, SqlError> {
        let mut snapshot = self.snapshot.lock().expect("snapshot lock");
        // reads only; mutations against a read tx are a bug in the caller
        let upper = stmt.trim().to_ascii_uppercase();
        if !(upper.starts_with("SELECT") || upper.starts_with("SHOW")) {
            return Err(SqlError::Backend(
                "write statement on a read-only transaction".into(),
            ));
        }
        MemDatabase::apply(&mut snapshot, stmt, args).map(|(rs, _)| rs)
    }
}

impl ReadTx for MemReadTx {}

#[async_trait]
impl TxMaker for MemDatabase {
    async fn begin_commit_tx(&self) -> Result<Box<dyn CommitTx>, SqlError> {
        let staged = self.committed.lock().expect("mem db lock").clone();
        Ok(Box::new(MemCommitTx {
            committed: Arc::clone(&self.committed),
            staged: Mutex::new(staged),
            changes: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait]
impl ReadTxMaker for MemDatabase {
    async fn begin_read_tx(&self) -> Result<Box<dyn ReadTx>, SqlError> {
        let snapshot = self.committed.lock().expect("mem db lock").clone();
        Ok(Box::new(MemReadTx {
            snapshot: Mutex::new(snapshot),
        }))
    }
}

/// In-memory vote store: holds pending resolutions, tallies approvals, and
/// runs registered handlers when thresholds are met.
#[derive(Default)]
pub struct MemVoteStore {
    pending: Mutex<BTreeMap<ResolutionId, Resolution>>,
}

impl MemVoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new pending resolution. Content-identical proposals
    /// deduplicate onto the same entry.
    pub fn create_resolution(
        &self,
        kind: &str,
        body: Vec<u8>,
        config: &ResolutionConfig,
        now: u64,
    ) -> ResolutionId {
        let id = ResolutionId::derive(kind, &body);
        let mut pending = self.pending.lock().expect("vote store lock");
        pending.entry(id).or_insert_with(|| Resolution {
            id,
            kind: kind.to_string(),
            body,
            approved_power: 0,
            expiration: now + config.expiration_period.as_nanos() as u64,
        });
        id
    }

    /// Records an approval carrying `power`. A vote arriving even one
    /// nanosecond past expiration is rejected.
    pub fn approve(
        &self,
        id: ResolutionId,
        power: i64,
        now: u64,
    ) -> Result<(), ResolutionError> {
        let mut pending = self.pending.lock().expect("vote store lock");
        let res = pending
            .get_mut(&id)
            .ok_or_else(|| ResolutionError::UnknownKind(id.to_string()))?;
        if now > res.expiration {
            return Err(ResolutionError::Expired);
        }
        res.approved_power += power;
        Ok(())
    }

    /// Number of pending resolutions.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("vote store lock").len()
    }

    /// Runs the resolve handlers for every pending resolution whose approval
    /// meets its kind's threshold. Multiple passers in the same block are
    /// processed in ascending serialized-payload order; each passer is
    /// removed from the store before its handler runs, and handler outcomes
    /// are returned per resolution.
    pub async fn process_passed(
        &self,
        registry: &ResolutionRegistry,
        app: &App<'_>,
        block: &mut BlockContext<'_>,
    ) -> Result<Vec<(ResolutionId, Result<(), ResolutionError>)>, SqlError> {
        let total = app.validators.total_power().await?;

        let mut passed: Vec<Resolution> = {
            let pending = self.pending.lock().expect("vote store lock");
            pending
                .values()
                .filter(|r| {
                    registry
                        .get(&r.kind)
                        .map(|cfg| cfg.threshold_met(r.approved_power, total))
                        .unwrap_or(false)
                })
                .cloned()
                .collect()
        };
        passed.sort_by(|a, b| a.body.cmp(&b.body));

        let mut outcomes = Vec::with_capacity(passed.len());
        for res in passed {
            {
                let mut pending = self.pending.lock().expect("vote store lock");
                // a handler may already have pruned this kind wholesale
                if pending.remove(&res.id).is_none() {
                    continue;
                }
            }
            let cfg = match registry.get(&res.kind) {
                Ok(c) => c,
                Err(e) => {
                    outcomes.push((res.id, Err(e)));
                    continue;
                }
            };
            let outcome = cfg.handler.resolve(app, &res, block).await;
            outcomes.push((res.id, outcome));
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl ResolutionStore for MemVoteStore {
    async fn resolution_by_id(&self, id: ResolutionId) -> Result<Option<Resolution>, SqlError> {
        Ok(self.pending.lock().expect("vote store lock").get(&id).cloned())
    }

    async fn resolutions_by_kind(&self, kind: &str) -> Result<Vec<Resolution>, SqlError> {
        let pending = self.pending.lock().expect("vote store lock");
        let mut out: Vec<Resolution> = pending
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.body.cmp(&b.body));
        Ok(out)
    }

    async fn delete_resolutions_by_kind(&self, kind: &str) -> Result<u64, SqlError> {
        let mut pending = self.pending.lock().expect("vote store lock");
        let before = pending.len();
        pending.retain(|_, r| r.kind != kind);
        Ok((before - pending.len()) as u64)
    }
}

/// In-memory account store.
#[derive(Default)]
pub struct MemAccounts {
    accounts: Mutex<BTreeMap<Vec<u8>, Account>>,
}

impl MemAccounts {
    /// Builds a store from `(account, balance, nonce)` triples.
    pub fn new<I: IntoIterator<Item = (Vec<u8>, i128, u64)>>(items: I) -> Self {
        Self {
            accounts: Mutex::new(
                items
                    .into_iter()
                    .map(|(id, balance, nonce)| (id, Account { balance, nonce }))
                    .collect(),
            ),
        }
    }

}

#[async_trait]
impl AccountReader for MemAccounts {
    async fn get_account(&self, _tx: &dyn Executor, account: &[u8]) -> Result<Account, SqlError> {
        Ok(self
            .accounts
            .lock()
            .expect("accounts lock")
            .get(account)
            .copied()
            .unwrap_or_default())
    }
}

/// In-memory validator set.
#[derive(Default)]
pub struct MemValidators {
    powers: BTreeMap<Vec<u8>, i64>,
}

impl MemValidators {
    /// Builds a set from `(pubkey, power)` pairs.
    pub fn new<I: IntoIterator<Item = (Vec<u8>, i64)>>(items: I) -> Self {
        Self {
            powers: items.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ValidatorReader for MemValidators {
    async fn validator_power(&self, pubkey: &[u8]) -> Result<i64, SqlError> {
        Ok(self.powers.get(pubkey).copied().unwrap_or(0))
    }

    async fn total_power(&self) -> Result<i64, SqlError> {
        Ok(self.powers.values().sum())
    }
}

/// Deterministic logical-dump producer over a [`MemDatabase`].
///
/// Dumps the last *committed* state; fixtures that want their writes in the
/// snapshot should commit them in a block before the snapshot height.
pub struct MemSnapshotProducer {
    db: Arc<MemDatabase>,
}

impl MemSnapshotProducer {
    /// Wraps the database whose committed state will be dumped.
    pub fn new(db: Arc<MemDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SnapshotProducer for MemSnapshotProducer {
    async fn dump_state(&self, _tx: &dyn Executor) -> Result<Vec<u8>, SnapshotError> {
        let state = self.db.committed_state();
        let mut out = Vec::new();
        writeln!(out, "-- meridian logical dump v0")?;
        writeln!(out, "-- excluded data: meridian_voting, meridian_internal")?;
        for schema in &state.schemas {
            writeln!(out, "CREATE SCHEMA IF NOT EXISTS {};", schema)?;
        }
        for write in &state.user_writes {
            writeln!(out, "{}", write)?;
        }
        Ok(out)
    }
}

/// Restorer double: captures the restored bytes and the replica-identity
/// call for assertions.
#[derive(Default)]
pub struct MemRestorer {
    /// The dump applied by `restore`, if any.
    pub restored: Mutex<Option<Vec<u8>>>,
    /// Whether `ensure_full_replica_identity` ran.
    pub replica_identity_enabled: Mutex<bool>,
}

#[async_trait]
impl SnapshotRestorer for MemRestorer {
    fn restore(&self, input: &mut dyn Read) -> Result<(), SnapshotError> {
        let mut buf = Vec::new();
        input.read_to_end(&mut buf)?;
        *self.restored.lock().expect("restorer lock") = Some(buf);
        Ok(())
    }

    async fn ensure_full_replica_identity(&self) -> Result<(), SqlError> {
        *self.replica_identity_enabled.lock().expect("restorer lock") = true;
        Ok(())
    }
}
