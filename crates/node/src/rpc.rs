// Path: crates/node/src/rpc.rs

//! The HTTP pull API an old-network node serves to its operator's
//! new-network node: migration metadata, per-height changesets, and the
//! genesis snapshot file. All three are read paths over committed state and
//! never block the consensus thread.

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use meridian_api::module::MigratorModule;
use meridian_api::resolutions::ResolutionStore;
use meridian_migrations::client::{CHANGESETS_ROUTE, GENESIS_STATE_ROUTE, METADATA_ROUTE};
use meridian_migrations::resolution::list_migrations;
use meridian_migrations::Migrator;
use meridian_types::error::ChangesetStoreError;
use meridian_types::migrations::{MigrationDeclaration, MigrationStatus};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Errors surfaced by the pull API, mapped onto HTTP statuses the client
/// keys its retry behavior on.
pub enum AppError {
    /// The resource does not exist (height outside the window, no snapshot).
    NotFound(String),
    /// The height is inside the window but not committed yet; retry later.
    NotReady(String),
    /// Anything else; logged server-side, opaque to the client.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg, code) = match self {
            AppError::NotFound(s) => (StatusCode::NOT_FOUND, s, "NOT_FOUND"),
            AppError::NotReady(s) => (StatusCode::SERVICE_UNAVAILABLE, s, "NOT_READY"),
            AppError::Internal(s) => {
                tracing::error!(target: "rpc", error = %s, "pull api internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": { "code": code, "message": msg } })),
        )
            .into_response()
    }
}

/// Shared state of the pull API: the migrator's read surface, the vote
/// store's pending proposals, and the current migration status as
/// republished by the block processor.
#[derive(Clone)]
pub struct RpcState {
    migrator: Arc<Migrator>,
    resolutions: Arc<dyn ResolutionStore>,
    status: watch::Receiver<MigrationStatus>,
}

impl RpcState {
    /// Bundles the migrator with the vote store and the status feed.
    pub fn new(
        migrator: Arc<Migrator>,
        resolutions: Arc<dyn ResolutionStore>,
        status: watch::Receiver<MigrationStatus>,
    ) -> Self {
        Self {
            migrator,
            resolutions,
            status,
        }
    }

    fn status(&self) -> MigrationStatus {
        *self.status.borrow()
    }
}

/// Route listing pending migration proposals, for the operator approval
/// workflow.
pub const PENDING_ROUTE: &str = "/migration/pending";

/// A pending migration proposal as listed to operators.
#[derive(Debug, Serialize)]
pub struct PendingMigration {
    /// Hex of the resolution ID, used to approve the proposal.
    pub id: String,
    /// Blocks between passage and migration start.
    pub activation_period: u64,
    /// Blocks the migration window stays open.
    pub duration: u64,
    /// The proposer's uniqueness timestamp.
    pub timestamp: String,
}

/// Builds the pull API router.
pub fn router(state: RpcState) -> Router {
    Router::new()
        .route(METADATA_ROUTE, get(get_metadata))
        .route(&format!("{}/:height", CHANGESETS_ROUTE), get(load_changesets))
        .route(GENESIS_STATE_ROUTE, get(genesis_state))
        .route(PENDING_ROUTE, get(pending_migrations))
        .with_state(state)
}

/// Serves the pull API until the process exits.
pub async fn serve(state: RpcState, listen_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    tracing::info!(target: "rpc", address = %listener.local_addr()?, "pull api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn get_metadata(State(state): State<RpcState>) -> Result<Response, AppError> {
    let meta = state
        .migrator
        .get_migration_metadata(state.status())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(meta).into_response())
}

async fn load_changesets(
    State(state): State<RpcState>,
    AxumPath(height): AxumPath<i64>,
) -> Result<Response, AppError> {
    match state.migrator.load_changeset(height) {
        Ok(data) => Ok(data.into_response()),
        Err(ChangesetStoreError::NotFound { .. }) => {
            // distinguish "not yet" from "never": a height inside the window
            // that the old chain has not committed is worth retrying
            let meta = state
                .migrator
                .get_migration_metadata(state.status())
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;
            let in_window = meta.end_height > meta.start_height
                && height >= meta.start_height
                && height < meta.end_height;
            if in_window && height > meta.last_changeset_height {
                Err(AppError::NotReady(format!(
                    "changeset for height {} is not yet available",
                    height
                )))
            } else {
                Err(AppError::NotFound(format!(
                    "no changeset for height {}",
                    height
                )))
            }
        }
        Err(e) => Err(AppError::Internal(e.to_string())),
    }
}

async fn pending_migrations(State(state): State<RpcState>) -> Result<Response, AppError> {
    let pending = list_migrations(state.resolutions.as_ref())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let mut out = Vec::with_capacity(pending.len());
    for res in pending {
        // a proposal that fails to decode would also fail at resolve time;
        // it has no place in the operator list
        let decl = MigrationDeclaration::decode(&res.body)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        out.push(PendingMigration {
            id: res.id.to_string(),
            activation_period: decl.activation_period,
            duration: decl.duration,
            timestamp: decl.timestamp,
        });
    }
    Ok(Json(out).into_response())
}

async fn genesis_state(State(state): State<RpcState>) -> Result<Response, AppError> {
    let path = state.migrator.genesis_snapshot_path();
    if !path.exists() {
        return Err(AppError::NotFound(
            "genesis snapshot has not been produced".to_string(),
        ));
    }
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(bytes.into_response())
}
