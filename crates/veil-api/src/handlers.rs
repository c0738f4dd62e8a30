//! HTTP handlers
//!
//! Thin wrappers over [`PoolQueries`]; all validation lives in the query layer.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use veil_indexer::storage::{CommitmentRow, DepositRow, NullifierRow, RootRow, WithdrawalRow};
use veil_indexer::{Database, Page, PageParams, PageRequest, PoolQueries, PoolSnapshot, Stats};

use crate::error::ApiResult;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<PoolQueries>,
    pub db: Arc<Database>,
    pub chain_id: u64,
}

impl AppState {
    pub fn new(db: Arc<Database>, chain_id: u64) -> Self {
        Self {
            queries: Arc::new(PoolQueries::new(db.clone())),
            db,
            chain_id,
        }
    }
}

pub async fn pools(State(state): State<AppState>) -> ApiResult<Json<Vec<PoolSnapshot>>> {
    Ok(Json(state.queries.get_pools().await?))
}

pub async fn pool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<PoolSnapshot>> {
    Ok(Json(state.queries.get_pool(&id).await?))
}

pub async fn pool_roots(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<RootRow>>> {
    Ok(Json(state.queries.list_roots(&id).await?))
}

pub async fn deposits(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Page<DepositRow>>> {
    let request = PageRequest::parse(&params)?;
    Ok(Json(state.queries.list_deposits(&request).await?))
}

pub async fn withdrawals(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Page<WithdrawalRow>>> {
    let request = PageRequest::parse(&params)?;
    Ok(Json(state.queries.list_withdrawals(&request).await?))
}

pub async fn commitment(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<CommitmentRow>> {
    Ok(Json(state.queries.get_commitment(&hash).await?))
}

pub async fn nullifier(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<NullifierRow>> {
    Ok(Json(state.queries.get_nullifier(&hash).await?))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.queries.get_stats().await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub chain_id: u64,
    /// Last block fully ingested, as a decimal string
    pub last_synced_block: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<Health>> {
    let last_synced_block = state.db.last_synced_block(state.chain_id).await?;
    Ok(Json(Health {
        status: "ok",
        chain_id: state.chain_id,
        last_synced_block: last_synced_block.map(|b| b.to_string()),
    }))
}
