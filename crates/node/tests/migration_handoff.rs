// Path: crates/node/tests/migration_handoff.rs

//! Full handoff exercise: an old network schedules and runs a migration
//! through the block processor while serving the pull API; a new-network
//! node restores from the downloaded genesis snapshot and replays every
//! changeset, in order, over HTTP.

use async_trait::async_trait;
use meridian_api::module::{ChangesetApplier, MigratorModule};
use meridian_api::resolutions::{App, ResolutionRegistry, ResolutionStore};
use meridian_api::sql::{Executor, SqlValue};
use meridian_api::test_utils::{
    MemAccounts, MemDatabase, MemRestorer, MemSnapshotProducer, MemValidators, MemVoteStore,
};
use meridian_mempool::Mempool;
use meridian_migrations::client::{ChangesetFetch, ChangesetSyncer, MigrationClient};
use meridian_migrations::resolution::{migration_resolution, register, START_MIGRATION_KIND};
use meridian_migrations::Migrator;
use meridian_node::boot::{initial_chain_context, restore_db};
use meridian_node::rpc::{router, RpcState};
use meridian_node::BlockProcessor;
use meridian_types::chain::{BlockContext, MigrationParams};
use meridian_types::config::{GenesisConfig, MigrationsConfig, NodeConfig};
use meridian_types::error::{MempoolError, SqlError};
use meridian_types::migrations::{MigrationDeclaration, MigrationStatus};
use meridian_types::transaction::{Payload, PayloadKind, Transaction, Transfer, TxBody};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct OldNetwork {
    _dir: TempDir,
    votes: Arc<MemVoteStore>,
    validators: Arc<MemValidators>,
    registry: ResolutionRegistry,
    migrator: Arc<Migrator>,
    bp: BlockProcessor,
    status_rx: watch::Receiver<MigrationStatus>,
}

impl OldNetwork {
    fn new(start_height: i64) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(MemDatabase::new());
        let migrator = Arc::new(
            Migrator::open(dir.path(), Box::new(MemSnapshotProducer::new(Arc::clone(&db))))
                .unwrap(),
        );
        let votes = Arc::new(MemVoteStore::new());
        let validators = Arc::new(MemValidators::new((1u8..=4).map(|i| (vec![i], 1))));
        let accounts = Arc::new(MemAccounts::new(vec![(vec![0xAB; 20], 100, 0)]));
        let mempool = Arc::new(Mempool::new(
            accounts,
            Arc::clone(&validators) as _,
            Arc::clone(&votes) as _,
        ));
        let mut registry = ResolutionRegistry::new();
        register(&mut registry).unwrap();

        let (status_tx, status_rx) = watch::channel(MigrationStatus::NoActiveMigration);
        let bp = BlockProcessor::new(
            Arc::clone(&db) as _,
            Arc::clone(&migrator) as Arc<dyn MigratorModule>,
            mempool,
            Default::default(),
            start_height,
            status_tx,
        );
        Self {
            _dir: dir,
            votes,
            validators,
            registry,
            migrator,
            bp,
            status_rx,
        }
    }

    async fn commit_block(&mut self) {
        let height = self.bp.height() + 1;
        let tx = self.bp.begin_block().await.unwrap();
        tx.execute(
            "INSERT INTO public.ledger (height) VALUES ($1)",
            &[SqlValue::Int(height)],
        )
        .await
        .unwrap();

        {
            let app = App {
                tx: tx.as_ref(),
                resolutions: self.votes.as_ref(),
                validators: self.validators.as_ref(),
            };
            let mut block = BlockContext {
                height,
                timestamp: height as u64,
                chain: self.bp.chain_mut(),
            };
            for (_, outcome) in self
                .votes
                .process_passed(&self.registry, &app, &mut block)
                .await
                .unwrap()
            {
                outcome.unwrap();
            }
        }

        self.bp.seal_block(height, height as u64, tx).await.unwrap();
    }

    fn status(&self) -> MigrationStatus {
        self.bp.chain().network_params.migration_status
    }
}

struct RecordingApplier {
    applied: Mutex<Vec<(i64, Vec<u8>)>>,
}

#[async_trait]
impl ChangesetApplier for RecordingApplier {
    async fn apply_changeset(&self, height: i64, data: &[u8]) -> Result<(), SqlError> {
        self.applied.lock().unwrap().push((height, data.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn old_network_hands_off_to_new_network() {
    let mut old = OldNetwork::new(100);

    // schedule: proposal at 101, threshold met in block 103
    old.commit_block().await;
    let id = old.votes.create_resolution(
        START_MIGRATION_KIND,
        MigrationDeclaration {
            activation_period: 10,
            duration: 5,
            timestamp: "2024-01-01T00:00:00Z".into(),
        }
        .encode(),
        &migration_resolution(),
        0,
    );
    old.commit_block().await;
    for _ in 0..3 {
        old.votes.approve(id, 1, 0).unwrap();
    }
    old.commit_block().await;
    assert_eq!(old.bp.height(), 103);
    assert_eq!(old.status(), MigrationStatus::ActivationPeriod);

    // run up into the window: snapshot at 112, open at 113, plus one block
    while old.bp.height() < 114 {
        old.commit_block().await;
    }
    assert_eq!(old.status(), MigrationStatus::MigrationInProgress);

    // the firewall now rejects transfers end to end
    let err = old
        .bp
        .check_transaction(&Transaction {
            sender: vec![0xAB; 20],
            body: TxBody {
                payload: Payload::Transfer(Transfer {
                    to: vec![2],
                    amount: 5,
                }),
                nonce: 1,
                chain_id: "meridian-1".into(),
                fee: 0,
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MempoolError::DisallowedInMigration {
            kind: PayloadKind::Transfer
        }
    ));

    // serve the pull api
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RpcState::new(
        Arc::clone(&old.migrator),
        Arc::clone(&old.votes) as Arc<dyn ResolutionStore>,
        old.status_rx.clone(),
    );
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    let client = MigrationClient::new(format!("http://{}", addr));

    // the scheduled migration consumed every pending proposal
    let pending: Vec<serde_json::Value> =
        reqwest::get(format!("http://{}/migration/pending", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert!(pending.is_empty());

    let meta = client.get_metadata().await.unwrap();
    assert_eq!(meta.status, MigrationStatus::MigrationInProgress);
    assert_eq!(meta.start_height, 113);
    assert_eq!(meta.end_height, 118);
    assert_eq!(meta.last_changeset_height, 114);
    let genesis_hash = meta.genesis_hash.unwrap();

    // a window height the old chain has not committed yet reads as not-ready
    assert_eq!(client.load_changesets(116).await.unwrap(), None);
    // a height outside the window is a hard error
    assert!(client.load_changesets(50).await.is_err());

    // the new node restores from the downloaded snapshot
    let new_dir = TempDir::new().unwrap();
    let snapshot_path = new_dir.path().join("genesis-state.sql.gz");
    std::fs::write(
        &snapshot_path,
        client.download_genesis_state().await.unwrap(),
    )
    .unwrap();

    let node_cfg = NodeConfig {
        root_dir: new_dir.path().to_string_lossy().into_owned(),
        genesis_state: snapshot_path.to_string_lossy().into_owned(),
        migrations: MigrationsConfig {
            enable: true,
            migrate_from: format!("http://{}", addr),
        },
        ..Default::default()
    };
    let genesis_cfg = GenesisConfig {
        chain_id: "meridian-2".into(),
        state_hash: Some(hex::encode(genesis_hash)),
        migration: Some(MigrationParams {
            start_height: meta.start_height,
            end_height: meta.end_height,
        }),
    };

    let new_db = MemDatabase::new();
    let restorer = MemRestorer::default();
    let new_votes = MemVoteStore::new();
    let restored = restore_db(&node_cfg, &genesis_cfg, &new_db, &restorer, &new_votes)
        .await
        .unwrap();
    assert!(restored);
    let dump = restorer.restored.lock().unwrap().clone().unwrap();
    let dump_text = String::from_utf8(dump).unwrap();
    assert!(dump_text.starts_with("-- meridian logical dump v0"));
    // writes committed before the snapshot block are in the dump
    assert!(dump_text.contains("public.ledger (height) VALUES ($1) $1=Int(111)"));
    // window writes are not; the changesets carry those
    assert!(!dump_text.contains("$1=Int(113)"));

    let mut new_chain = initial_chain_context(&node_cfg, &genesis_cfg);
    assert_eq!(
        new_chain.network_params.migration_status,
        MigrationStatus::GenesisMigration
    );

    // the old chain finishes its window and halts
    while old.bp.height() < 118 {
        old.commit_block().await;
    }
    assert_eq!(old.status(), MigrationStatus::MigrationCompleted);
    assert!(!old.bp.ready_to_propose());

    // the new node replays the full window over http
    let applier = Arc::new(RecordingApplier {
        applied: Mutex::new(Vec::new()),
    });
    let syncer = ChangesetSyncer::new(
        Arc::new(client) as Arc<dyn ChangesetFetch>,
        Arc::clone(&applier) as Arc<dyn ChangesetApplier>,
    )
    .with_poll_interval(Duration::from_millis(5));
    syncer
        .run(new_chain.migration_params.unwrap())
        .await
        .unwrap();

    let applied = applier.applied.lock().unwrap();
    let heights: Vec<i64> = applied.iter().map(|(h, _)| *h).collect();
    assert_eq!(heights, vec![113, 114, 115, 116, 117]);
    for (height, data) in applied.iter() {
        assert_eq!(data, &old.migrator.load_changeset(*height).unwrap());
        assert!(!data.is_empty());
    }

    // the sync is complete; the new network becomes autonomous
    new_chain.network_params.finish_genesis_sync();
    assert_eq!(
        new_chain.network_params.migration_status,
        MigrationStatus::NoActiveMigration
    );
}
