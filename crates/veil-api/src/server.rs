//! HTTP server using axum

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use veil_indexer::Database;

use crate::handlers::{self, AppState};

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(db: Arc<Database>, chain_id: u64) -> Self {
        Self {
            state: AppState::new(db, chain_id),
        }
    }

    pub async fn new_in_memory(chain_id: u64) -> anyhow::Result<Self> {
        let db = Arc::new(Database::in_memory().await?);
        Ok(Self::new(db, chain_id))
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/pools", get(handlers::pools))
            .route("/pool/:id", get(handlers::pool))
            .route("/pool/:id/roots", get(handlers::pool_roots))
            .route("/deposits", get(handlers::deposits))
            .route("/withdrawals", get(handlers::withdrawals))
            .route("/commitments/:hash", get(handlers::commitment))
            .route("/nullifier/:hash", get(handlers::nullifier))
            .route("/stats", get(handlers::stats))
            .route("/health", get(handlers::health))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Veil indexer API listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn database(&self) -> Arc<Database> {
        self.state.db.clone()
    }
}
