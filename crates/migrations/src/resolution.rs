// Path: crates/migrations/src/resolution.rs

//! The `start_migration` resolution kind: its confirmation threshold, its
//! expiration, and the resolve callback that schedules a migration when the
//! network's validators approve one.

use crate::store;
use async_trait::async_trait;
use meridian_api::resolutions::{
    App, Resolution, ResolutionConfig, ResolutionHandler, ResolutionRegistry,
};
use meridian_types::chain::BlockContext;
use meridian_types::error::ResolutionError;
use meridian_types::migrations::{ActiveMigration, MigrationDeclaration, MigrationStatus};
use std::sync::Arc;
use std::time::Duration;

pub use meridian_types::migrations::START_MIGRATION_KIND;

/// Share of total validator power required to pass a migration resolution.
/// Strict: ties round up to the next whole vote.
pub const CONFIRMATION_THRESHOLD: (u64, u64) = (2, 3);

/// Wall-clock lifetime of a pending migration resolution.
pub const EXPIRATION_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60); // 1 week

/// The configuration for the `start_migration` resolution kind.
pub fn migration_resolution() -> ResolutionConfig {
    ResolutionConfig {
        confirmation_threshold: CONFIRMATION_THRESHOLD,
        expiration_period: EXPIRATION_PERIOD,
        handler: Arc::new(StartMigrationHandler),
    }
}

/// Registers the `start_migration` kind with the vote store's registry.
/// Called once at process init.
pub fn register(registry: &mut ResolutionRegistry) -> Result<(), ResolutionError> {
    registry.register_resolution(START_MIGRATION_KIND, migration_resolution())
}

/// Resolve callback: schedules the migration described by the passed
/// declaration.
struct StartMigrationHandler;

#[async_trait]
impl ResolutionHandler for StartMigrationHandler {
    async fn resolve(
        &self,
        app: &App<'_>,
        resolution: &Resolution,
        block: &mut BlockContext<'_>,
    ) -> Result<(), ResolutionError> {
        // a node that is itself a migration child ignores the proposal: the
        // network it would migrate from is the one currently feeding it
        if block.chain.migration_params.is_some() {
            tracing::warn!(
                target: "migrations",
                "node is currently migrating from the old chain; resubmit the proposal after the current migration completes"
            );
            return Ok(());
        }

        if block.chain.network_params.migration_status != MigrationStatus::NoActiveMigration {
            return Err(ResolutionError::AlreadyMigrating);
        }
        if store::migration_active(app.tx).await? {
            return Err(ResolutionError::ActiveMigrationExists);
        }

        let decl = MigrationDeclaration::decode(&resolution.body)?;
        if decl.duration == 0 {
            return Err(ResolutionError::InvalidDeclaration(
                "duration must be at least one block".to_string(),
            ));
        }

        // the start height is the height this resolution passed at plus the
        // activation period; the end height adds the duration on top
        let activation =
            i64::try_from(decl.activation_period).map_err(|_| ResolutionError::HeightOverflow)?;
        let duration =
            i64::try_from(decl.duration).map_err(|_| ResolutionError::HeightOverflow)?;
        let start_height = block
            .height
            .checked_add(activation)
            .ok_or(ResolutionError::HeightOverflow)?;
        let end_height = start_height
            .checked_add(duration)
            .ok_or(ResolutionError::HeightOverflow)?;

        let active = ActiveMigration::new(start_height, end_height)
            .map_err(|e| ResolutionError::InvalidDeclaration(e.to_string()))?;
        store::create_migration(app.tx, &active).await?;

        block
            .chain
            .network_params
            .transition_migration_status(MigrationStatus::ActivationPeriod);
        tracing::info!(
            target: "migrations",
            start_height,
            end_height,
            "migration started"
        );

        // the surviving proposals of this kind are now moot
        let deleted = app
            .resolutions
            .delete_resolutions_by_kind(START_MIGRATION_KIND)
            .await?;
        if deleted > 0 {
            tracing::debug!(target: "migrations", deleted, "pruned pending migration resolutions");
        }

        Ok(())
    }
}

/// The pending migration proposals, for the operator-facing list RPC. Ordered
/// by ascending serialized payload, the same order passage is processed in.
pub async fn list_migrations(
    resolutions: &dyn meridian_api::resolutions::ResolutionStore,
) -> Result<Vec<Resolution>, ResolutionError> {
    Ok(resolutions.resolutions_by_kind(START_MIGRATION_KIND).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_api::resolutions::ResolutionStore;
    use meridian_api::sql::TxMaker;
    use meridian_api::test_utils::{MemDatabase, MemValidators, MemVoteStore};
    use meridian_types::chain::ChainContext;
    use meridian_types::error::CodecError;
    use meridian_types::transaction::ResolutionId;

    fn declaration(activation: u64, duration: u64, ts: &str) -> Vec<u8> {
        MigrationDeclaration {
            activation_period: activation,
            duration,
            timestamp: ts.to_string(),
        }
        .encode()
    }

    fn pending(body: Vec<u8>) -> Resolution {
        Resolution {
            id: ResolutionId::derive(START_MIGRATION_KIND, &body),
            kind: START_MIGRATION_KIND.to_string(),
            body,
            approved_power: 3,
            expiration: u64::MAX,
        }
    }

    async fn resolve_at(
        height: i64,
        chain: &mut ChainContext,
        db: &MemDatabase,
        votes: &MemVoteStore,
        body: Vec<u8>,
    ) -> Result<(), ResolutionError> {
        let validators = MemValidators::new(vec![(vec![1], 1), (vec![2], 1)]);
        let tx = db.begin_commit_tx().await.unwrap();
        let outcome = {
            let app = App {
                tx: tx.as_ref(),
                resolutions: votes,
                validators: &validators,
            };
            let mut block = BlockContext {
                height,
                timestamp: 0,
                chain,
            };
            StartMigrationHandler
                .resolve(&app, &pending(body), &mut block)
                .await
        };
        if outcome.is_ok() {
            tx.commit().await.unwrap();
        } else {
            tx.rollback().await.unwrap();
        }
        outcome
    }

    #[tokio::test]
    async fn passage_schedules_the_window() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        resolve_at(103, &mut chain, &db, &votes, declaration(10, 5, "t"))
            .await
            .unwrap();

        assert_eq!(
            chain.network_params.migration_status,
            MigrationStatus::ActivationPeriod
        );
        let tx = db.begin_commit_tx().await.unwrap();
        let active = store::get_migration(tx.as_ref()).await.unwrap().unwrap();
        assert_eq!(active, ActiveMigration::new(113, 118).unwrap());
    }

    #[tokio::test]
    async fn second_passage_rejected_while_migrating() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        resolve_at(103, &mut chain, &db, &votes, declaration(10, 5, "a"))
            .await
            .unwrap();
        let err = resolve_at(104, &mut chain, &db, &votes, declaration(1, 1, "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::AlreadyMigrating));

        // the original window is unaffected
        let tx = db.begin_commit_tx().await.unwrap();
        let active = store::get_migration(tx.as_ref()).await.unwrap().unwrap();
        assert_eq!(active.start_height, 113);
    }

    #[tokio::test]
    async fn stale_record_without_status_is_rejected() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        // a record exists but the status parameter was not flipped; the
        // store check still refuses a second migration
        {
            let tx = db.begin_commit_tx().await.unwrap();
            store::create_migration(tx.as_ref(), &ActiveMigration::new(5, 9).unwrap())
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }
        let err = resolve_at(10, &mut chain, &db, &votes, declaration(1, 1, "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::ActiveMigrationExists));
    }

    #[tokio::test]
    async fn migration_child_ignores_proposals() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext {
            migration_params: Some(meridian_types::chain::MigrationParams {
                start_height: 1,
                end_height: 2,
            }),
            ..Default::default()
        };

        resolve_at(10, &mut chain, &db, &votes, declaration(1, 1, "t"))
            .await
            .unwrap();
        // ignored: no record created, status unchanged
        assert_eq!(
            chain.network_params.migration_status,
            MigrationStatus::NoActiveMigration
        );
        let tx = db.begin_commit_tx().await.unwrap();
        assert!(!store::migration_active(tx.as_ref()).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        let err = resolve_at(10, &mut chain, &db, &votes, vec![0, 0, 1])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolutionError::Decode(CodecError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        let err = resolve_at(10, &mut chain, &db, &votes, declaration(5, 0, "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::InvalidDeclaration(_)));
    }

    #[tokio::test]
    async fn activation_overflow_is_rejected() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        let err = resolve_at(10, &mut chain, &db, &votes, declaration(u64::MAX, 1, "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::HeightOverflow));

        let err = resolve_at(
            i64::MAX - 5,
            &mut chain,
            &db,
            &votes,
            declaration(10, 1, "t"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolutionError::HeightOverflow));
    }

    #[tokio::test]
    async fn passage_prunes_sibling_proposals() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let cfg = migration_resolution();
        votes.create_resolution(START_MIGRATION_KIND, declaration(9, 9, "later"), &cfg, 0);
        votes.create_resolution("other_kind", b"unrelated".to_vec(), &cfg, 0);

        let mut chain = ChainContext::default();
        resolve_at(103, &mut chain, &db, &votes, declaration(10, 5, "t"))
            .await
            .unwrap();

        assert!(votes
            .resolutions_by_kind(START_MIGRATION_KIND)
            .await
            .unwrap()
            .is_empty());
        // unrelated kinds survive
        assert_eq!(votes.pending_count(), 1);
    }

    #[tokio::test]
    async fn activation_zero_starts_at_the_resolve_height() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let mut chain = ChainContext::default();

        resolve_at(200, &mut chain, &db, &votes, declaration(0, 1, "t"))
            .await
            .unwrap();
        let tx = db.begin_commit_tx().await.unwrap();
        let active = store::get_migration(tx.as_ref()).await.unwrap().unwrap();
        assert_eq!(active, ActiveMigration::new(200, 201).unwrap());
    }
}
