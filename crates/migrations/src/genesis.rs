// Path: crates/migrations/src/genesis.rs

//! Consumer side of the genesis snapshot: verification against the genesis
//! `state_hash`, restore into an uninitialized database, and the cleanup that
//! follows a restore (the dump carries the old network's pending migration
//! resolutions and active-migration record, which are meaningless on the new
//! network).

use crate::resolution::START_MIGRATION_KIND;
use crate::store;
use flate2::read::GzDecoder;
use meridian_api::module::SnapshotRestorer;
use meridian_api::resolutions::ResolutionStore;
use meridian_api::sql::Executor;
use meridian_types::error::{MigrationError, SnapshotError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Streams the snapshot file through SHA-256, returning the digest and the
/// file size in bytes.
pub fn snapshot_file_hash(path: &Path) -> Result<([u8; 32], u64), SnapshotError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size: u64 = 0;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hasher.finalize().into(), size))
}

/// Verifies the snapshot file against the hash the genesis config demands.
/// A mismatch is fatal at boot: the node must not start from unverified
/// state.
pub fn verify_genesis_snapshot(path: &Path, expected: [u8; 32]) -> Result<(), SnapshotError> {
    let (got, _) = snapshot_file_hash(path)?;
    if got != expected {
        return Err(SnapshotError::HashMismatch {
            expected: hex::encode(expected),
            got: hex::encode(got),
        });
    }
    Ok(())
}

/// Opens the snapshot for reading, transparently decompressing when the file
/// carries the `.gz` extension.
pub fn open_snapshot_reader(path: &Path) -> Result<Box<dyn Read + Send>, SnapshotError> {
    let file = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Restores the local database from a genesis snapshot: verifies the file
/// hash, applies the dump, and enables full replica identity on the restored
/// user datasets so changeset replay resolves rows unambiguously.
///
/// The caller has already established that the database is uninitialized and
/// that the genesis config carries a `state_hash`.
pub async fn restore_genesis_state(
    path: &Path,
    expected_hash: [u8; 32],
    restorer: &dyn SnapshotRestorer,
) -> Result<(), SnapshotError> {
    if !path.exists() {
        return Err(SnapshotError::NotProvided);
    }
    verify_genesis_snapshot(path, expected_hash)?;

    let mut reader = open_snapshot_reader(path)?;
    restorer.restore(reader.as_mut())?;
    restorer
        .ensure_full_replica_identity()
        .await
        .map_err(|e| SnapshotError::Restore(e.to_string()))?;

    tracing::info!(
        target: "migrations",
        path = %path.display(),
        hash = %hex::encode(expected_hash),
        "database restored from genesis snapshot"
    );
    Ok(())
}

/// Removes the migration state the dump carried over from the old network:
/// pending `start_migration` resolutions and the active-migration record.
/// Runs once, right after a successful genesis restore.
pub async fn cleanup_resolutions_after_migration(
    tx: &dyn Executor,
    resolutions: &dyn ResolutionStore,
) -> Result<(), MigrationError> {
    let deleted = resolutions
        .delete_resolutions_by_kind(START_MIGRATION_KIND)
        .await?;
    store::delete_migration(tx).await?;
    tracing::info!(
        target: "migrations",
        deleted,
        "cleaned up migration state after genesis restore"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use meridian_api::sql::TxMaker;
    use meridian_api::test_utils::{MemDatabase, MemRestorer, MemVoteStore};
    use meridian_types::migrations::ActiveMigration;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_gz(path: &Path, content: &[u8]) -> [u8; 32] {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        let bytes = encoder.finish().unwrap();
        std::fs::write(path, &bytes).unwrap();
        Sha256::digest(&bytes).into()
    }

    #[tokio::test]
    async fn restore_applies_the_decompressed_dump() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("genesis-state.sql.gz");
        let hash = write_gz(&path, b"-- dump contents\n");

        let restorer = MemRestorer::default();
        restore_genesis_state(&path, hash, &restorer).await.unwrap();

        assert_eq!(
            restorer.restored.lock().unwrap().as_deref(),
            Some(b"-- dump contents\n".as_slice())
        );
        assert!(*restorer.replica_identity_enabled.lock().unwrap());
    }

    #[tokio::test]
    async fn hash_mismatch_is_fatal_and_leaves_db_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("genesis-state.sql.gz");
        write_gz(&path, b"real contents");

        let restorer = MemRestorer::default();
        let err = restore_genesis_state(&path, [0xAA; 32], &restorer)
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::HashMismatch { .. }));
        // the restore never started
        assert!(restorer.restored.lock().unwrap().is_none());
        assert!(!*restorer.replica_identity_enabled.lock().unwrap());
    }

    #[tokio::test]
    async fn missing_file_reports_not_provided() {
        let dir = tempdir().unwrap();
        let restorer = MemRestorer::default();
        let err = restore_genesis_state(&dir.path().join("absent.sql.gz"), [0; 32], &restorer)
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::NotProvided));
    }

    #[tokio::test]
    async fn uncompressed_snapshots_are_read_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("genesis-state.sql");
        std::fs::write(&path, b"plain dump").unwrap();
        let hash: [u8; 32] = Sha256::digest(b"plain dump").into();

        let restorer = MemRestorer::default();
        restore_genesis_state(&path, hash, &restorer).await.unwrap();
        assert_eq!(
            restorer.restored.lock().unwrap().as_deref(),
            Some(b"plain dump".as_slice())
        );
    }

    #[tokio::test]
    async fn cleanup_removes_carried_over_state() {
        let db = MemDatabase::new();
        let votes = MemVoteStore::new();
        let cfg = crate::resolution::migration_resolution();
        votes.create_resolution(START_MIGRATION_KIND, vec![1, 2, 3], &cfg, 0);

        {
            let tx = db.begin_commit_tx().await.unwrap();
            store::create_migration(tx.as_ref(), &ActiveMigration::new(113, 118).unwrap())
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let tx = db.begin_commit_tx().await.unwrap();
        cleanup_resolutions_after_migration(tx.as_ref(), &votes)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(votes.pending_count(), 0);
        let tx = db.begin_commit_tx().await.unwrap();
        assert!(!store::migration_active(tx.as_ref()).await.unwrap());
    }
}
