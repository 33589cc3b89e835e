// Path: crates/migrations/src/client.rs

//! Pull client run by nodes of the *new* network. After restoring from the
//! genesis snapshot, a new-network node polls its operator's old-network node
//! for each height's changeset until the old chain's end height is reached;
//! at that point the new network becomes autonomous.

use async_trait::async_trait;
use meridian_api::module::ChangesetApplier;
use meridian_types::chain::MigrationParams;
use meridian_types::error::MigrationError;
use meridian_types::migrations::MigrationMetadata;
use std::sync::Arc;
use std::time::Duration;

/// Route serving migration metadata on the old node.
pub const METADATA_ROUTE: &str = "/migration/metadata";
/// Route prefix serving per-height changesets on the old node.
pub const CHANGESETS_ROUTE: &str = "/migration/changesets";
/// Route serving the genesis snapshot file on the old node.
pub const GENESIS_STATE_ROUTE: &str = "/migration/genesis-state";

/// A source of old-network changesets. The production implementation is
/// [`MigrationClient`]; tests substitute their own.
#[async_trait]
pub trait ChangesetFetch: Send + Sync {
    /// The old network's migration metadata.
    async fn get_metadata(&self) -> Result<MigrationMetadata, MigrationError>;

    /// One height's changeset: `Ok(Some(bytes))` once committed,
    /// `Ok(None)` while the old chain has not produced it yet.
    async fn load_changesets(&self, height: i64) -> Result<Option<Vec<u8>>, MigrationError>;
}

/// HTTP client for the old network's pull API.
pub struct MigrationClient {
    base: String,
    http: reqwest::Client,
}

impl MigrationClient {
    /// Creates a client for the pull API at `base`, e.g.
    /// `http://127.0.0.1:8484`.
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base, route)
    }

    /// Downloads the old network's genesis snapshot file.
    pub async fn download_genesis_state(&self) -> Result<Vec<u8>, MigrationError> {
        let resp = self
            .http
            .get(self.url(GENESIS_STATE_ROUTE))
            .send()
            .await
            .map_err(|e| MigrationError::Sync(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MigrationError::Sync(format!(
                "genesis state request failed with status {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MigrationError::Sync(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ChangesetFetch for MigrationClient {
    async fn get_metadata(&self) -> Result<MigrationMetadata, MigrationError> {
        let resp = self
            .http
            .get(self.url(METADATA_ROUTE))
            .send()
            .await
            .map_err(|e| MigrationError::Sync(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MigrationError::Sync(format!(
                "metadata request failed with status {}",
                resp.status()
            )));
        }
        resp.json::<MigrationMetadata>()
            .await
            .map_err(|e| MigrationError::Sync(e.to_string()))
    }

    async fn load_changesets(&self, height: i64) -> Result<Option<Vec<u8>>, MigrationError> {
        let resp = self
            .http
            .get(self.url(&format!("{}/{}", CHANGESETS_ROUTE, height)))
            .send()
            .await
            .map_err(|e| MigrationError::Sync(e.to_string()))?;
        match resp.status() {
            s if s.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| MigrationError::Sync(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            // the old chain has not committed this height yet
            reqwest::StatusCode::SERVICE_UNAVAILABLE => Ok(None),
            reqwest::StatusCode::NOT_FOUND => Err(MigrationError::Sync(format!(
                "height {} is outside the migration window",
                height
            ))),
            s => Err(MigrationError::Sync(format!(
                "changeset request for height {} failed with status {}",
                height, s
            ))),
        }
    }
}

/// Replays the old network's changesets, in height order, onto the local
/// database. Drives the node from `GenesisMigration` to autonomy.
pub struct ChangesetSyncer {
    fetcher: Arc<dyn ChangesetFetch>,
    applier: Arc<dyn ChangesetApplier>,
    poll_interval: Duration,
}

impl ChangesetSyncer {
    /// Creates a syncer polling `fetcher` and applying through `applier`.
    pub fn new(fetcher: Arc<dyn ChangesetFetch>, applier: Arc<dyn ChangesetApplier>) -> Self {
        Self {
            fetcher,
            applier,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Overrides the polling interval used while waiting for the old chain
    /// to commit the next height.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pulls and applies every changeset in `[start_height, end_height)`,
    /// in order. Transient fetch failures are retried indefinitely: the sync
    /// can only finish forward, never partially.
    pub async fn run(&self, window: MigrationParams) -> Result<(), MigrationError> {
        tracing::info!(
            target: "migrations",
            start_height = window.start_height,
            end_height = window.end_height,
            "starting changeset sync from the old network"
        );
        for height in window.start_height..window.end_height {
            loop {
                match self.fetcher.load_changesets(height).await {
                    Ok(Some(data)) => {
                        self.applier
                            .apply_changeset(height, &data)
                            .await
                            .map_err(|e| MigrationError::Sync(e.to_string()))?;
                        tracing::debug!(target: "migrations", height, bytes = data.len(), "changeset applied");
                        break;
                    }
                    Ok(None) => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(e) => {
                        tracing::warn!(target: "migrations", height, error = %e, "changeset fetch failed, retrying");
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }
        tracing::info!(
            target: "migrations",
            end_height = window.end_height,
            "changeset sync complete; this network is now autonomous"
        );
        Ok(())
    }
}
