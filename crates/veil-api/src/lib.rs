//! Veil pool indexer service
//!
//! ```text
//! Base JSON-RPC node
//!    |
//!    | eth_getLogs (finalized ranges)
//!    v
//! +------------------+
//! | LogSyncer        |  <-- checkpoint per chain in sync_state
//! +------------------+
//!    |
//!    | decoded PoolEvents, ordered per pool
//!    v
//! +------------------+
//! | Ingestor         |  <-- one task per pool
//! | Reconciler       |  <-- one SQLite transaction per event
//! +------------------+
//!    |
//!    v
//! +------------------+
//! | SQLite           |
//! +------------------+
//!    ^
//!    | read-only
//! +------------------+
//! | HTTP API (axum)  |  <-- /pools, /deposits, /withdrawals, /stats, ...
//! +------------------+
//! ```

pub mod error;
pub mod handlers;
pub mod server;
pub mod sync;

pub use error::{ApiError, ApiResult};
pub use handlers::AppState;
pub use server::Server;
pub use sync::{LogSyncer, SyncError};
