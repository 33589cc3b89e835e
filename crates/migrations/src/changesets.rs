// Path: crates/migrations/src/changesets.rs

//! Append-only per-height persistence of the changesets the old chain
//! forwards to the new one.
//!
//! Layout under the migrations root:
//!
//! ```text
//! changesets/<height>/chunks/<seq>   opaque chunk bytes
//! changesets/<height>/.committed     sentinel, written last
//! ```
//!
//! A height is readable iff its sentinel exists. Durability discipline:
//! every chunk file is fsynced before the sentinel is written, the sentinel
//! is fsynced before the height directory entry is fsynced, and only then
//! does `append` return. If the process dies mid-append, the height has no
//! sentinel, `open` reports `NotFound`, and consensus re-executes the block,
//! rewriting the changeset from scratch.

use meridian_api::module::ChangesetReceiver;
use meridian_types::error::ChangesetStoreError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

const COMMITTED_SENTINEL: &str = ".committed";
const CHUNKS_DIR: &str = "chunks";

/// The on-disk changeset store. Exclusively owned by the migrator; readers
/// only ever open committed files, which are never rewritten in place.
#[derive(Debug)]
pub struct ChangesetStore {
    root: PathBuf,
}

impl ChangesetStore {
    /// Opens (creating if needed) the store rooted at `root`, and wipes any
    /// height directory left without a sentinel by a crash.
    pub fn open(root: &Path) -> Result<Self, ChangesetStoreError> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
        };
        store.wipe_uncommitted()?;
        Ok(store)
    }

    fn height_dir(&self, height: i64) -> PathBuf {
        self.root.join(height.to_string())
    }

    /// Drains a block's changeset channel into per-height storage.
    ///
    /// If the height is already committed, meaning consensus is re-executing
    /// a block it had already persisted, the channel is drained and discarded so the
    /// producer never blocks, and the stored bytes are left untouched.
    pub async fn append(
        &self,
        height: i64,
        mut changes: ChangesetReceiver,
    ) -> Result<(), ChangesetStoreError> {
        let dir = self.height_dir(height);

        if dir.join(COMMITTED_SENTINEL).exists() {
            tracing::debug!(target: "migrations", height, "changeset already committed, draining");
            while changes.recv().await.is_some() {}
            return Ok(());
        }

        // a partial directory from an aborted attempt is rewritten from scratch
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        let chunks_dir = dir.join(CHUNKS_DIR);
        fs::create_dir_all(&chunks_dir)?;

        let mut seq: u64 = 0;
        let mut total: u64 = 0;
        while let Some(chunk) = changes.recv().await {
            let path = chunks_dir.join(format!("{:08}", seq));
            let mut f = OpenOptions::new().create_new(true).write(true).open(&path)?;
            f.write_all(&chunk)?;
            f.sync_data()?;
            seq += 1;
            total += chunk.len() as u64;
        }

        let sentinel = dir.join(COMMITTED_SENTINEL);
        let mut f = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&sentinel)?;
        f.write_all(format!("{}\n{}\n", seq, total).as_bytes())?;
        f.sync_all()?;
        File::open(&dir)?.sync_all()?;

        tracing::info!(target: "migrations", height, chunks = seq, bytes = total, "changeset stored");
        Ok(())
    }

    /// Returns a restartable reader over the committed changeset of a
    /// height, or `NotFound` if no sentinel exists.
    pub fn open_height(&self, height: i64) -> Result<ChangesetReader, ChangesetStoreError> {
        let dir = self.height_dir(height);
        if !dir.join(COMMITTED_SENTINEL).exists() {
            return Err(ChangesetStoreError::NotFound { height });
        }
        let chunks = Self::sorted_chunks(&dir.join(CHUNKS_DIR))?;
        Ok(ChangesetReader {
            chunks,
            next: 0,
            current: None,
        })
    }

    /// Loads the full committed changeset of a height into memory, chunks
    /// concatenated in sequence order.
    pub fn load(&self, height: i64) -> Result<Vec<u8>, ChangesetStoreError> {
        let mut reader = self.open_height(height)?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// The greatest height with a committed changeset, if any. Served from a
    /// directory scan, so read paths may observe a slightly stale value while
    /// a commit is in flight; they never observe a torn one.
    pub fn last_stored_height(&self) -> Result<Option<i64>, ChangesetStoreError> {
        let mut max: Option<i64> = None;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let Ok(height) = entry.file_name().to_string_lossy().parse::<i64>() else {
                continue;
            };
            if entry.path().join(COMMITTED_SENTINEL).exists() {
                max = Some(max.map_or(height, |m: i64| m.max(height)));
            }
        }
        Ok(max)
    }

    /// Removes height directories that have no sentinel. Called at startup:
    /// such directories are leftovers of a commit the database also rolled
    /// back, and the block will be re-executed.
    pub fn wipe_uncommitted(&self) -> Result<(), ChangesetStoreError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.file_name().to_string_lossy().parse::<i64>().is_err() {
                continue;
            }
            if !entry.path().join(COMMITTED_SENTINEL).exists() {
                tracing::warn!(
                    target: "migrations",
                    dir = %entry.path().display(),
                    "removing uncommitted changeset directory"
                );
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    /// Deletes every stored changeset. Used when a fresh genesis bootstraps
    /// the new network and the forwarded history is no longer needed.
    pub fn prune_all(&self) -> Result<(), ChangesetStoreError> {
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            }
        }
        Ok(())
    }

    fn sorted_chunks(chunks_dir: &Path) -> Result<Vec<PathBuf>, ChangesetStoreError> {
        let mut chunks: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(chunks_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let seq = name
                .to_string_lossy()
                .parse::<u64>()
                .map_err(|_| {
                    ChangesetStoreError::Corrupt(format!(
                        "bad chunk file name: {}",
                        entry.path().display()
                    ))
                })?;
            chunks.push((seq, entry.path()));
        }
        chunks.sort_by_key(|(seq, _)| *seq);
        for (i, (seq, path)) in chunks.iter().enumerate() {
            if *seq != i as u64 {
                return Err(ChangesetStoreError::Corrupt(format!(
                    "chunk sequence gap at {}",
                    path.display()
                )));
            }
        }
        Ok(chunks.into_iter().map(|(_, p)| p).collect())
    }
}

/// A sequential reader over a height's committed chunk files. Opening the
/// height again yields a fresh reader, so consumers can restart a transfer
/// from the beginning at any time.
pub struct ChangesetReader {
    chunks: Vec<PathBuf>,
    next: usize,
    current: Option<File>,
}

impl Read for ChangesetReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(f) = self.current.as_mut() {
                let n = f.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                self.current = None;
            }
            if self.next >= self.chunks.len() {
                return Ok(0);
            }
            self.current = Some(File::open(&self.chunks[self.next])?);
            self.next += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_api::module::changeset_channel;
    use tempfile::tempdir;

    async fn append_chunks(
        store: &ChangesetStore,
        height: i64,
        chunks: Vec<Vec<u8>>,
    ) -> Result<(), ChangesetStoreError> {
        let (tx, rx) = changeset_channel();
        let send = async move {
            for c in chunks {
                tx.send(c).await.unwrap();
            }
        };
        let (_, appended) = tokio::join!(send, store.append(height, rx));
        appended
    }

    #[tokio::test]
    async fn append_then_open_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();

        append_chunks(&store, 113, vec![b"abc".to_vec(), b"def".to_vec()])
            .await
            .unwrap();

        assert_eq!(store.load(113).unwrap(), b"abcdef");
        assert_eq!(store.last_stored_height().unwrap(), Some(113));
    }

    #[tokio::test]
    async fn chunk_order_survives_double_digit_sequences() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();

        let chunks: Vec<Vec<u8>> = (0..12u8).map(|i| vec![i]).collect();
        append_chunks(&store, 7, chunks.clone()).await.unwrap();

        let loaded = store.load(7).unwrap();
        assert_eq!(loaded, (0..12u8).collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn open_refuses_height_without_sentinel() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();

        // simulate a crash after chunk 3 of height 115, before the sentinel
        let chunks_dir = dir.path().join("115").join(CHUNKS_DIR);
        fs::create_dir_all(&chunks_dir).unwrap();
        for seq in 0..4 {
            fs::write(chunks_dir.join(format!("{:08}", seq)), b"partial").unwrap();
        }

        assert!(matches!(
            store.open_height(115),
            Err(ChangesetStoreError::NotFound { height: 115 })
        ));
        assert_eq!(store.last_stored_height().unwrap(), None);

        // re-execution rewrites the height from scratch
        append_chunks(&store, 115, vec![b"complete".to_vec()])
            .await
            .unwrap();
        assert_eq!(store.load(115).unwrap(), b"complete");
    }

    #[tokio::test]
    async fn reappend_of_committed_height_is_a_noop() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();

        append_chunks(&store, 20, vec![b"original".to_vec()])
            .await
            .unwrap();
        // a retry during block re-execution must not clobber the stored bytes
        append_chunks(&store, 20, vec![b"replayed".to_vec()])
            .await
            .unwrap();

        assert_eq!(store.load(20).unwrap(), b"original");
    }

    #[tokio::test]
    async fn startup_wipes_uncommitted_directories() {
        let dir = tempdir().unwrap();
        {
            let store = ChangesetStore::open(dir.path()).unwrap();
            append_chunks(&store, 10, vec![b"keep".to_vec()]).await.unwrap();
        }
        let torn = dir.path().join("11").join(CHUNKS_DIR);
        fs::create_dir_all(&torn).unwrap();
        fs::write(torn.join("00000000"), b"torn").unwrap();

        let store = ChangesetStore::open(dir.path()).unwrap();
        assert!(!dir.path().join("11").exists());
        assert_eq!(store.load(10).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn reader_is_restartable() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();
        append_chunks(&store, 5, vec![b"one".to_vec(), b"two".to_vec()])
            .await
            .unwrap();

        let mut first = String::new();
        store
            .open_height(5)
            .unwrap()
            .read_to_string(&mut first)
            .unwrap();
        let mut second = String::new();
        store
            .open_height(5)
            .unwrap()
            .read_to_string(&mut second)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "onetwo");
    }

    #[tokio::test]
    async fn empty_changeset_commits_cleanly() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();
        append_chunks(&store, 30, vec![]).await.unwrap();
        assert_eq!(store.load(30).unwrap(), Vec::<u8>::new());
        assert_eq!(store.last_stored_height().unwrap(), Some(30));
    }

    #[tokio::test]
    async fn prune_all_empties_the_store() {
        let dir = tempdir().unwrap();
        let store = ChangesetStore::open(dir.path()).unwrap();
        append_chunks(&store, 1, vec![b"x".to_vec()]).await.unwrap();
        append_chunks(&store, 2, vec![b"y".to_vec()]).await.unwrap();
        store.prune_all().unwrap();
        assert_eq!(store.last_stored_height().unwrap(), None);
    }
}
