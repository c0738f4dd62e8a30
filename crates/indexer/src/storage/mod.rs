//! SQLite persistence for derived pool state
//!
//! Tables:
//! - `pools`: per-pool counters and linked contract addresses
//! - `deposits`, `withdrawals`: the ledger, keyed by commitment / nullifier hash
//! - `commitments`: append-only leaves, keyed by (hash, pool)
//! - `nullifier_hashes`: spent nullifiers, the double-spend guard
//! - `merkle_roots`: root snapshots, keyed by (root, pool)
//! - `sync_state`: last fully ingested block per chain
//!
//! Addresses and hashes are stored as lowercase `0x` hex, wei amounts as
//! decimal text.

pub mod ledger;
pub mod pools;

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{hex, Address, U256};
use serde::{Serialize, Serializer};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::IndexerResult;

const SCHEMA: [&str; 10] = [
    r#"
    CREATE TABLE IF NOT EXISTS pools (
        id TEXT PRIMARY KEY,
        denomination TEXT NOT NULL,
        total_deposits INTEGER NOT NULL DEFAULT 0,
        total_withdrawals INTEGER NOT NULL DEFAULT 0,
        last_leaf_index INTEGER NOT NULL DEFAULT 0,
        validator_contract TEXT NOT NULL,
        veil_deployer TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deposits (
        id TEXT PRIMARY KEY,
        pool_id TEXT NOT NULL REFERENCES pools(id),
        sender TEXT NOT NULL,
        leaf_index INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        is_spent INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_deposits_pool_time
    ON deposits(pool_id, timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS withdrawals (
        id TEXT PRIMARY KEY,
        pool_id TEXT NOT NULL REFERENCES pools(id),
        recipient TEXT NOT NULL,
        relayer TEXT NOT NULL,
        fee TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        deposit_id TEXT REFERENCES deposits(id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_withdrawals_pool_time
    ON withdrawals(pool_id, timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commitments (
        hash TEXT NOT NULL,
        pool_id TEXT NOT NULL REFERENCES pools(id),
        leaf_index INTEGER NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (hash, pool_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nullifier_hashes (
        hash TEXT PRIMARY KEY,
        pool_id TEXT NOT NULL REFERENCES pools(id),
        timestamp INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS merkle_roots (
        root TEXT NOT NULL,
        pool_id TEXT NOT NULL REFERENCES pools(id),
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (root, pool_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_merkle_roots_pool
    ON merkle_roots(pool_id, timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        chain_id INTEGER PRIMARY KEY,
        last_block INTEGER NOT NULL,
        updated_at INTEGER NOT NULL DEFAULT (unixepoch())
    )
    "#,
];

pub struct Database {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl Database {
    pub async fn new(database_url: &str) -> IndexerResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private in-memory database; a single connection keeps it alive.
    pub async fn in_memory() -> IndexerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> IndexerResult<Self> {
        let db = Self {
            pool,
            writer: Mutex::new(()),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> IndexerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Exclusive right to open a write transaction.
    ///
    /// SQLite admits one writer at a time; holding this while the transaction
    /// is open keeps concurrent pool streams from failing with SQLITE_BUSY.
    pub async fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    pub async fn last_synced_block(&self, chain_id: u64) -> IndexerResult<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_block FROM sync_state WHERE chain_id = ?")
                .bind(chain_id as i64)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(block,)| block as u64))
    }

    pub async fn set_last_synced_block(&self, chain_id: u64, block: u64) -> IndexerResult<()> {
        let _writer = self.writer().await;
        sqlx::query(
            r#"
            INSERT INTO sync_state (chain_id, last_block)
            VALUES (?, ?)
            ON CONFLICT(chain_id) DO UPDATE SET
                last_block = excluded.last_block,
                updated_at = unixepoch()
            "#,
        )
        .bind(chain_id as i64)
        .bind(block as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Canonical text key for an address or hash
pub fn hex_key(bytes: impl AsRef<[u8]>) -> String {
    hex::encode_prefixed(bytes)
}

/// Everything needed to create a pool row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPool {
    pub address: Address,
    pub denomination: U256,
    pub validator_contract: Address,
    pub veil_deployer: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PoolRow {
    pub id: String,
    pub denomination: String,
    pub total_deposits: i64,
    pub total_withdrawals: i64,
    pub last_leaf_index: i64,
    pub validator_contract: String,
    pub veil_deployer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DepositRow {
    pub id: String,
    pub pool_id: String,
    pub sender: String,
    pub leaf_index: i64,
    #[serde(serialize_with = "decimal")]
    pub timestamp: i64,
    pub is_spent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRow {
    pub id: String,
    pub pool_id: String,
    pub recipient: String,
    pub relayer: String,
    pub fee: String,
    #[serde(serialize_with = "decimal")]
    pub timestamp: i64,
    pub deposit_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommitmentRow {
    pub hash: String,
    pub pool_id: String,
    #[serde(rename = "index")]
    pub leaf_index: i64,
    #[serde(serialize_with = "decimal")]
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NullifierRow {
    pub hash: String,
    pub pool_id: String,
    #[serde(serialize_with = "decimal")]
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RootRow {
    pub root: String,
    pub pool_id: String,
    #[serde(serialize_with = "decimal")]
    pub timestamp: i64,
}

/// Large integers go over the wire as decimal strings
fn decimal<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
