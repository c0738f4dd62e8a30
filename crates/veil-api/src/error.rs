//! Error types for the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use veil_indexer::{IndexerError, QueryError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Indexer(#[from] IndexerError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(QueryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Query(QueryError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Query(QueryError::Corrupt(_) | QueryError::Database(_)) | Self::Indexer(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
