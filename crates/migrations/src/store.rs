// Path: crates/migrations/src/store.rs

//! SQL-backed migration state store: the single active-migration row and the
//! last-changeset-height watermark, both in the reserved
//! `meridian_migrations` schema. Every write here happens inside the block
//! commit transaction, so the record and the block are atomic.

use meridian_api::sql::{Executor, SqlValue};
use meridian_types::error::SqlError;
use meridian_types::migrations::ActiveMigration;

/// The reserved schema owned by the migration subsystem.
pub const MIGRATIONS_SCHEMA: &str = "meridian_migrations";

const SQL_INIT_SCHEMA: &str = "CREATE SCHEMA IF NOT EXISTS meridian_migrations";

const SQL_INIT_ACTIVE: &str = "CREATE TABLE IF NOT EXISTS meridian_migrations.active \
    (id INT8 PRIMARY KEY, start_height INT8 NOT NULL, end_height INT8 NOT NULL)";

const SQL_INIT_LAST_CHANGESET: &str = "CREATE TABLE IF NOT EXISTS meridian_migrations.last_changeset \
    (id INT8 PRIMARY KEY, height INT8 NOT NULL)";

const SQL_CREATE_MIGRATION: &str = "INSERT INTO meridian_migrations.active \
    (id, start_height, end_height) VALUES (1, $1, $2) ON CONFLICT (id) DO NOTHING";

const SQL_GET_MIGRATION: &str =
    "SELECT start_height, end_height FROM meridian_migrations.active WHERE id = 1";

const SQL_DELETE_MIGRATION: &str = "DELETE FROM meridian_migrations.active WHERE id = 1";

const SQL_SET_LAST_CHANGESET: &str = "INSERT INTO meridian_migrations.last_changeset \
    (id, height) VALUES (1, $1) ON CONFLICT (id) DO UPDATE SET height = EXCLUDED.height";

const SQL_GET_LAST_CHANGESET: &str =
    "SELECT height FROM meridian_migrations.last_changeset WHERE id = 1";

/// Creates the reserved schema and its tables if they do not exist yet.
pub async fn init_migration_schema(tx: &dyn Executor) -> Result<(), SqlError> {
    tx.execute(SQL_INIT_SCHEMA, &[]).await?;
    tx.execute(SQL_INIT_ACTIVE, &[]).await?;
    tx.execute(SQL_INIT_LAST_CHANGESET, &[])
        .await?;
    Ok(())
}

/// Persists the active migration record. Fails with `AlreadyExists` if a
/// record from a previous transaction is present; within the same
/// transaction batch the insert is conflict-free by construction, since the
/// resolve callback checks for an existing record first.
pub async fn create_migration(
    tx: &dyn Executor,
    active: &ActiveMigration,
) -> Result<(), SqlError> {
    if get_migration(tx).await?.is_some() {
        return Err(SqlError::AlreadyExists("active migration".to_string()));
    }
    tx.execute(
        SQL_CREATE_MIGRATION,
        &[
            SqlValue::Int(active.start_height),
            SqlValue::Int(active.end_height),
        ],
    )
    .await?;
    Ok(())
}

/// Whether an active migration record exists.
pub async fn migration_active(tx: &dyn Executor) -> Result<bool, SqlError> {
    Ok(get_migration(tx).await?.is_some())
}

/// Reads the active migration record, if any.
pub async fn get_migration(tx: &dyn Executor) -> Result<Option<ActiveMigration>, SqlError> {
    let rs = tx.execute(SQL_GET_MIGRATION, &[]).await?;
    let Some(row) = rs.rows.first() else {
        return Ok(None);
    };
    let start_height = row
        .first()
        .ok_or_else(|| SqlError::Decode("missing start_height column".into()))
        .and_then(|v| v.as_int("start_height"))?;
    let end_height = row
        .get(1)
        .ok_or_else(|| SqlError::Decode("missing end_height column".into()))
        .and_then(|v| v.as_int("end_height"))?;
    Ok(Some(ActiveMigration {
        start_height,
        end_height,
    }))
}

/// Removes the active migration record. Only called on the new network after
/// a genesis restore carried the old record over.
pub async fn delete_migration(tx: &dyn Executor) -> Result<(), SqlError> {
    tx.execute(SQL_DELETE_MIGRATION, &[])
        .await?;
    Ok(())
}

/// Records the highest height whose changeset is durably stored. Runs inside
/// the same transaction that commits the block, so the watermark can never
/// run ahead of or behind the stored changesets.
pub async fn set_last_changeset_height(
    tx: &dyn Executor,
    height: i64,
) -> Result<(), SqlError> {
    tx.execute(SQL_SET_LAST_CHANGESET, &[SqlValue::Int(height)])
        .await?;
    Ok(())
}

/// Reads the last-changeset-height watermark, if set.
pub async fn last_changeset_height(tx: &dyn Executor) -> Result<Option<i64>, SqlError> {
    let rs = tx.execute(SQL_GET_LAST_CHANGESET, &[]).await?;
    match rs.rows.first() {
        Some(row) => {
            let h = row
                .first()
                .ok_or_else(|| SqlError::Decode("missing height column".into()))
                .and_then(|v| v.as_int("height"))?;
            Ok(Some(h))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_api::sql::TxMaker;
    use meridian_api::test_utils::MemDatabase;

    #[tokio::test]
    async fn create_is_unique_across_transactions() {
        let db = MemDatabase::new();

        let tx = db.begin_commit_tx().await.unwrap();
        init_migration_schema(tx.as_ref()).await.unwrap();
        let active = ActiveMigration::new(113, 118).unwrap();
        create_migration(tx.as_ref(), &active).await.unwrap();
        assert!(migration_active(tx.as_ref()).await.unwrap());
        tx.commit().await.unwrap();

        let tx = db.begin_commit_tx().await.unwrap();
        assert_eq!(get_migration(tx.as_ref()).await.unwrap(), Some(active));
        let err = create_migration(tx.as_ref(), &active).await.unwrap_err();
        assert!(matches!(err, SqlError::AlreadyExists(_)));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn uncommitted_record_is_invisible() {
        let db = MemDatabase::new();
        let tx = db.begin_commit_tx().await.unwrap();
        init_migration_schema(tx.as_ref()).await.unwrap();
        create_migration(tx.as_ref(), &ActiveMigration::new(5, 10).unwrap())
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let tx = db.begin_commit_tx().await.unwrap();
        assert!(!migration_active(tx.as_ref()).await.unwrap());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn watermark_upserts() {
        let db = MemDatabase::new();
        let tx = db.begin_commit_tx().await.unwrap();
        init_migration_schema(tx.as_ref()).await.unwrap();
        assert_eq!(last_changeset_height(tx.as_ref()).await.unwrap(), None);
        set_last_changeset_height(tx.as_ref(), 113).await.unwrap();
        set_last_changeset_height(tx.as_ref(), 114).await.unwrap();
        assert_eq!(
            last_changeset_height(tx.as_ref()).await.unwrap(),
            Some(114)
        );
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn delete_clears_the_record() {
        let db = MemDatabase::new();
        let tx = db.begin_commit_tx().await.unwrap();
        init_migration_schema(tx.as_ref()).await.unwrap();
        create_migration(tx.as_ref(), &ActiveMigration::new(1, 2).unwrap())
            .await
            .unwrap();
        delete_migration(tx.as_ref()).await.unwrap();
        assert!(!migration_active(tx.as_ref()).await.unwrap());
        tx.commit().await.unwrap();
    }
}
