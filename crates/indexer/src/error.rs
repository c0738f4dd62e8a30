//! Error types for ingestion and queries

use alloy_primitives::Address;
use thiserror::Error;
use veil_contracts::DecodeError;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown pool: {0:?}")]
    UnknownPool(Address),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Pool metadata read failed: {0}")]
    Provision(String),

    #[error("Log decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Ingestion task failed: {0}")]
    Task(String),
}

impl IndexerError {
    /// Errors that reject a single event without halting the pipeline.
    ///
    /// Everything else leaves the event unapplied and must be retried.
    pub fn is_event_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownPool(_) | Self::Integrity(_) | Self::Decode(_)
        )
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Stored value is malformed: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type QueryResult<T> = Result<T, QueryError>;
