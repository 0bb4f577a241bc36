use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use trace_core::{
    chain::Ledger, constants::GENESIS_BLOCK_NUMBER, entity::Entity, Block, ChainReport, EntityStore,
    Hash, Journey, LedgerError, Transaction,
};

use crate::{
    constants::{BLOCKS_PER_PAGE, MAX_BLOCKS_PER_REQUEST},
    error::ApiError,
};

pub struct AppState<S: EntityStore> {
    ledger: Ledger<S>,
}

impl<S: EntityStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: EntityStore + 'static> AppState<S> {
    /// Runs a ledger call on the blocking pool; the store and the append
    /// backoff both block.
    async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger<S>) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(ApiError::internal)?
            .map_err(ApiError::from)
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Head {
    height: u64,
    tip_hash: Option<Hash>,
}

#[derive(Deserialize)]
struct BlocksQuery {
    from: Option<u64>,
    limit: Option<u64>,
}

#[derive(Deserialize)]
struct AppendRequest {
    transaction_type: String,
    transaction_data: serde_json::Value,
    entity_id: String,
}

#[derive(Serialize)]
struct Stored {
    id: String,
    kind: &'static str,
}

pub fn router<S: EntityStore + 'static>(ledger: Ledger<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain/head", get(head::<S>))
        .route("/chain/verify", get(verify::<S>))
        .route("/blocks", get(blocks::<S>))
        .route("/blocks/{number}", get(block::<S>))
        .route("/entities", post(put_entity::<S>))
        .route("/entities/{id}/history", get(history::<S>))
        .route("/ledger/append", post(append::<S>))
        .route("/provenance/{code}", get(provenance::<S>))
        .with_state(AppState { ledger })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn head<S: EntityStore + 'static>(State(state): State<AppState<S>>) -> Result<Json<Head>, ApiError> {
    let (height, tip_hash) = state.run(|ledger| ledger.tip()).await?;
    Ok(Json(Head { height, tip_hash }))
}

async fn verify<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<ChainReport>, ApiError> {
    Ok(Json(state.run(|ledger| ledger.verify()).await?))
}

async fn blocks<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<BlocksQuery>,
) -> Result<Json<Vec<Block>>, ApiError> {
    let from = query.from.unwrap_or(GENESIS_BLOCK_NUMBER);
    let limit = query.limit.unwrap_or(BLOCKS_PER_PAGE).min(MAX_BLOCKS_PER_REQUEST);
    Ok(Json(state.run(move |ledger| ledger.blocks(from, limit)).await?))
}

async fn block<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(number): Path<u64>,
) -> Result<Json<Block>, ApiError> {
    state
        .run(move |ledger| ledger.block(number))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound {
            kind: "BlockNotFound",
            id: number.to_string(),
        })
}

async fn put_entity<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Json(entity): Json<Entity>,
) -> Result<(StatusCode, Json<Stored>), ApiError> {
    let stored = Stored {
        id: entity.id().to_string(),
        kind: entity.kind().as_str(),
    };
    state
        .run(move |ledger| Ok(ledger.store().put_entity(entity)?))
        .await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn history<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(state.run(move |ledger| ledger.history(&id)).await?))
}

async fn append<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Json(req): Json<AppendRequest>,
) -> Result<(StatusCode, Json<Block>), ApiError> {
    let transaction = Transaction::from_parts(&req.transaction_type, req.transaction_data)?;
    let entity_id = req.entity_id;
    let block = state
        .run(move |ledger| ledger.append(transaction, &entity_id))
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}

async fn provenance<S: EntityStore + 'static>(
    State(state): State<AppState<S>>,
    Path(code): Path<String>,
) -> Result<Json<Journey>, ApiError> {
    Ok(Json(state.run(move |ledger| ledger.resolve(&code)).await?))
}
