pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod provision;
pub mod query;
pub mod storage;

pub use config::{DenominationRegistry, IndexerConfig};
pub use engine::{ApplyOutcome, Reconciler};
pub use error::{IndexerError, IndexerResult, QueryError, QueryResult};
pub use ingest::{IngestReport, Ingestor};
pub use provision::{PoolMetadata, PoolMetadataSource, RpcMetadataSource, StaticMetadata};
pub use query::{Page, PageParams, PageRequest, PoolQueries, PoolSnapshot, Stats};
pub use storage::Database;
