//! Read-only queries over indexed pool state
//!
//! Ledger listings are ordered newest first by `(timestamp, id)` and paged
//! with a timestamp cursor. `next` walks toward older rows, `prev` toward
//! newer ones.
//!
//! `prevCursor` echoes the cursor that was supplied, so following it with
//! `direction=prev` returns only rows strictly newer than that cursor, not the
//! page that preceded the current one. Rows sharing the boundary timestamp
//! of a full page are not returned by the following page.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use std::sync::Arc;

use crate::config::format_ether;
use crate::error::{QueryError, QueryResult};
use crate::storage::{
    hex_key, ledger, pools, CommitmentRow, Database, DepositRow, NullifierRow, PoolRow, RootRow,
    WithdrawalRow,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Raw listing parameters as they arrive in a query string
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub pool_id: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<String>,
    pub direction: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    /// Older than the cursor
    #[default]
    Next,
    /// Newer than the cursor
    Prev,
}

/// Validated listing parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Canonical hex key of the pool filter
    pub pool_id: Option<String>,
    pub cursor: Option<i64>,
    pub limit: u32,
    pub direction: Direction,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            pool_id: None,
            cursor: None,
            limit: DEFAULT_PAGE_SIZE,
            direction: Direction::Next,
        }
    }
}

impl PageRequest {
    pub fn parse(params: &PageParams) -> QueryResult<Self> {
        let pool_id = match non_empty(&params.pool_id) {
            Some(raw) => Some(hex_key(parse_address(raw)?)),
            None => None,
        };

        let cursor = match non_empty(&params.cursor) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .ok()
                    .filter(|c| *c >= 0)
                    .ok_or_else(|| QueryError::Validation(format!("invalid cursor {raw:?}")))?,
            ),
            None => None,
        };

        let limit = match non_empty(&params.limit) {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| QueryError::Validation(format!("invalid limit {raw:?}")))?
                .clamp(1, MAX_PAGE_SIZE as i64) as u32,
            None => DEFAULT_PAGE_SIZE,
        };

        let direction = match non_empty(&params.direction) {
            None | Some("next") => Direction::Next,
            Some("prev") => Direction::Prev,
            Some(other) => {
                return Err(QueryError::Validation(format!(
                    "direction must be \"next\" or \"prev\", got {other:?}"
                )))
            }
        };

        Ok(Self {
            pool_id,
            cursor,
            limit,
            direction,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_address(raw: &str) -> QueryResult<Address> {
    raw.parse()
        .map_err(|_| QueryError::Validation(format!("invalid address {raw:?}")))
}

fn parse_hash(raw: &str) -> QueryResult<B256> {
    raw.parse()
        .map_err(|_| QueryError::Validation(format!("invalid hash {raw:?}")))
}

/// ETH label for a pool's stored wei denomination
fn denomination_label(pool: &PoolRow) -> QueryResult<String> {
    let wei: U256 = pool.denomination.parse().map_err(|_| {
        QueryError::Corrupt(format!(
            "pool {} denomination {:?}",
            pool.id, pool.denomination
        ))
    })?;
    format_ether(wei)
        .map_err(|e| QueryError::Corrupt(format!("pool {} denomination: {e}", pool.id)))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

/// A pool with its full ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    #[serde(flatten)]
    pub pool: PoolRow,
    pub deposits: Vec<DepositRow>,
    pub withdrawals: Vec<WithdrawalRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub pool_id: String,
    /// Denomination in ETH, e.g. `"0.1"`
    pub denomination: String,
    pub deposits: i64,
    pub withdrawals: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_deposits: i64,
    pub total_withdrawals: i64,
    pub pool_stats: Vec<PoolStats>,
}

/// Ledger tables that can be paged by timestamp
trait Paginated: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin {
    const TABLE: &'static str;
    const COLUMNS: &'static str;

    fn timestamp(&self) -> i64;
}

impl Paginated for DepositRow {
    const TABLE: &'static str = "deposits";
    const COLUMNS: &'static str = ledger::DEPOSIT_COLUMNS;

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Paginated for WithdrawalRow {
    const TABLE: &'static str = "withdrawals";
    const COLUMNS: &'static str = ledger::WITHDRAWAL_COLUMNS;

    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

pub struct PoolQueries {
    db: Arc<Database>,
}

impl PoolQueries {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get_pools(&self) -> QueryResult<Vec<PoolSnapshot>> {
        let rows = pools::list(self.db.pool()).await?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in rows {
            snapshots.push(self.snapshot(row).await?);
        }
        Ok(snapshots)
    }

    pub async fn get_pool(&self, id: &str) -> QueryResult<PoolSnapshot> {
        let row = self.find_pool(id).await?;
        self.snapshot(row).await
    }

    pub async fn list_deposits(&self, request: &PageRequest) -> QueryResult<Page<DepositRow>> {
        self.list_page(request).await
    }

    pub async fn list_withdrawals(
        &self,
        request: &PageRequest,
    ) -> QueryResult<Page<WithdrawalRow>> {
        self.list_page(request).await
    }

    pub async fn get_commitment(&self, hash: &str) -> QueryResult<CommitmentRow> {
        let hash = parse_hash(hash)?;
        ledger::find_commitment(self.db.pool(), &hash)
            .await?
            .ok_or(QueryError::NotFound("Commitment"))
    }

    pub async fn get_nullifier(&self, hash: &str) -> QueryResult<NullifierRow> {
        let hash = parse_hash(hash)?;
        ledger::find_nullifier(self.db.pool(), &hash)
            .await?
            .ok_or(QueryError::NotFound("Nullifier"))
    }

    pub async fn get_stats(&self) -> QueryResult<Stats> {
        let db = self.db.pool();
        let (total_deposits, total_withdrawals, rows) = tokio::try_join!(
            ledger::count_deposits(db),
            ledger::count_withdrawals(db),
            pools::list(db),
        )?;

        let pool_stats = rows
            .into_iter()
            .map(|row| {
                Ok(PoolStats {
                    denomination: denomination_label(&row)?,
                    pool_id: row.id,
                    deposits: row.total_deposits,
                    withdrawals: row.total_withdrawals,
                })
            })
            .collect::<QueryResult<_>>()?;

        Ok(Stats {
            total_deposits,
            total_withdrawals,
            pool_stats,
        })
    }

    /// Root snapshots for a pool, newest first
    pub async fn list_roots(&self, id: &str) -> QueryResult<Vec<RootRow>> {
        let row = self.find_pool(id).await?;
        Ok(ledger::roots_for_pool(self.db.pool(), &row.id).await?)
    }

    async fn find_pool(&self, id: &str) -> QueryResult<PoolRow> {
        let address = parse_address(id)?;
        pools::find(self.db.pool(), &address)
            .await?
            .ok_or(QueryError::NotFound("Pool"))
    }

    async fn snapshot(&self, pool: PoolRow) -> QueryResult<PoolSnapshot> {
        let db = self.db.pool();
        let (deposits, withdrawals) = tokio::try_join!(
            ledger::deposits_for_pool(db, &pool.id),
            ledger::withdrawals_for_pool(db, &pool.id),
        )?;

        Ok(PoolSnapshot {
            pool,
            deposits,
            withdrawals,
        })
    }

    /// One page of `T` around the cursor. The cursor is a bare timestamp and
    /// both bounds are strict, so rows tied with the cursor are skipped.
    async fn list_page<T: Paginated>(&self, request: &PageRequest) -> QueryResult<Page<T>> {
        let db = self.db.pool();
        let pool_id = request.pool_id.as_deref();
        let limit = request.limit as usize;

        let (items, has_older) = match (request.direction, request.cursor) {
            (Direction::Prev, Some(cursor)) => {
                // The `limit` rows just above the cursor, then flipped back to
                // newest first.
                let sql = format!(
                    "SELECT {} FROM {} \
                     WHERE (?1 IS NULL OR pool_id = ?1) AND timestamp > ?2 \
                     ORDER BY timestamp ASC, id ASC LIMIT ?3",
                    T::COLUMNS,
                    T::TABLE
                );
                let mut items: Vec<T> = sqlx::query_as(&sql)
                    .bind(pool_id)
                    .bind(cursor)
                    .bind(limit as i64)
                    .fetch_all(db)
                    .await?;
                items.reverse();

                let has_older = match items.last() {
                    Some(last) => self.has_older::<T>(pool_id, last.timestamp()).await?,
                    None => false,
                };
                (items, has_older)
            }
            _ => {
                let sql = format!(
                    "SELECT {} FROM {} \
                     WHERE (?1 IS NULL OR pool_id = ?1) AND (?2 IS NULL OR timestamp < ?2) \
                     ORDER BY timestamp DESC, id DESC LIMIT ?3",
                    T::COLUMNS,
                    T::TABLE
                );
                let mut items: Vec<T> = sqlx::query_as(&sql)
                    .bind(pool_id)
                    .bind(request.cursor)
                    .bind(limit as i64 + 1)
                    .fetch_all(db)
                    .await?;

                let has_older = items.len() > limit;
                items.truncate(limit);
                (items, has_older)
            }
        };

        let next_cursor = if has_older {
            items.last().map(|row| row.timestamp().to_string())
        } else {
            None
        };

        Ok(Page {
            items,
            next_cursor,
            prev_cursor: request.cursor.map(|c| c.to_string()),
        })
    }

    async fn has_older<T: Paginated>(
        &self,
        pool_id: Option<&str>,
        timestamp: i64,
    ) -> QueryResult<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE (?1 IS NULL OR pool_id = ?1) AND timestamp < ?2)",
            T::TABLE
        );
        let (exists,): (bool,) = sqlx::query_as(&sql)
            .bind(pool_id)
            .bind(timestamp)
            .fetch_one(self.db.pool())
            .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DenominationRegistry;
    use crate::engine::Reconciler;
    use alloy_primitives::address;
    use crate::provision::{PoolMetadata, StaticMetadata};
    use veil_contracts::{DepositEvent, PoolEvent, WithdrawalEvent};

    const POOL_A: Address = address!("0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a");
    const POOL_B: Address = address!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");

    async fn seeded() -> (Reconciler, PoolQueries) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let registry = DenominationRegistry::new()
            .with_pool(POOL_A, U256::from(100_000_000_000_000_000u64))
            .with_pool(POOL_B, U256::from(1_000_000_000_000_000_000u64));
        let metadata = StaticMetadata(PoolMetadata {
            validator_contract: Address::repeat_byte(0xa1),
            veil_deployer: Address::repeat_byte(0xd1),
        });
        let engine = Reconciler::new(db.clone(), Arc::new(registry), Arc::new(metadata));

        // Pool A: deposits at t=100..=500, pool B: one deposit at t=250.
        for i in 0..5u8 {
            engine
                .apply(&deposit(POOL_A, 0xc0 + i, i as u32, 100 * (i as u64 + 1)))
                .await
                .unwrap();
        }
        engine.apply(&deposit(POOL_B, 0xb0, 0, 250)).await.unwrap();
        engine
            .apply(&PoolEvent::Withdrawal(WithdrawalEvent {
                pool: POOL_A,
                nullifier_hash: B256::repeat_byte(0xc0),
                recipient: Address::repeat_byte(0x22),
                relayer: Address::repeat_byte(0x33),
                fee: U256::from(5u64),
                timestamp: 600,
            }))
            .await
            .unwrap();

        (engine, PoolQueries::new(db))
    }

    fn deposit(pool: Address, commitment: u8, leaf_index: u32, timestamp: u64) -> PoolEvent {
        PoolEvent::Deposit(DepositEvent {
            pool,
            commitment: B256::repeat_byte(commitment),
            sender: Address::repeat_byte(0x11),
            leaf_index,
            timestamp,
        })
    }

    fn params(pairs: &[(&str, &str)]) -> PageRequest {
        let mut params = PageParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "poolId" => params.pool_id = value,
                "cursor" => params.cursor = value,
                "limit" => params.limit = value,
                "direction" => params.direction = value,
                _ => unreachable!(),
            }
        }
        PageRequest::parse(&params).unwrap()
    }

    fn timestamps(page: &Page<DepositRow>) -> Vec<i64> {
        page.items.iter().map(|d| d.timestamp).collect()
    }

    #[test]
    fn test_page_request_defaults_and_clamping() {
        assert_eq!(params(&[]), PageRequest::default());
        assert_eq!(params(&[("limit", "0")]).limit, 1);
        assert_eq!(params(&[("limit", "1000")]).limit, MAX_PAGE_SIZE);
        assert_eq!(params(&[("direction", "prev")]).direction, Direction::Prev);
        assert_eq!(
            params(&[("poolId", "0x0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A0A")]).pool_id,
            Some(hex_key(POOL_A))
        );
    }

    #[test]
    fn test_page_request_rejects_bad_input() {
        let bad = [
            PageParams {
                cursor: Some("yesterday".into()),
                ..Default::default()
            },
            PageParams {
                cursor: Some("-1".into()),
                ..Default::default()
            },
            PageParams {
                limit: Some("ten".into()),
                ..Default::default()
            },
            PageParams {
                direction: Some("sideways".into()),
                ..Default::default()
            },
            PageParams {
                pool_id: Some("0x1234".into()),
                ..Default::default()
            },
        ];
        for params in bad {
            assert!(matches!(
                PageRequest::parse(&params),
                Err(QueryError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_pagination_round_trip() {
        let (_engine, queries) = seeded().await;
        let filter = hex_key(POOL_A);

        let first = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "2")]))
            .await
            .unwrap();
        assert_eq!(timestamps(&first), vec![500, 400]);
        assert_eq!(first.next_cursor.as_deref(), Some("400"));
        assert_eq!(first.prev_cursor, None);

        let second = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "2"), ("cursor", "400")]))
            .await
            .unwrap();
        assert_eq!(timestamps(&second), vec![300, 200]);
        assert_eq!(second.next_cursor.as_deref(), Some("200"));
        assert_eq!(second.prev_cursor.as_deref(), Some("400"));

        let last = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "2"), ("cursor", "200")]))
            .await
            .unwrap();
        assert_eq!(timestamps(&last), vec![100]);
        assert_eq!(last.next_cursor, None);

        let back = queries
            .list_deposits(&params(&[
                ("poolId", &filter),
                ("limit", "2"),
                ("cursor", "300"),
                ("direction", "prev"),
            ]))
            .await
            .unwrap();
        assert_eq!(timestamps(&back), timestamps(&first));
        assert_eq!(back.items[0], first.items[0]);
        assert_eq!(back.next_cursor.as_deref(), Some("400"));
    }

    #[tokio::test]
    async fn test_following_prev_cursor_returns_newer_rows_only() {
        let (_engine, queries) = seeded().await;
        let filter = hex_key(POOL_A);

        let first = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "2")]))
            .await
            .unwrap();
        let cursor = first.next_cursor.clone().unwrap();
        let second = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "2"), ("cursor", &cursor)]))
            .await
            .unwrap();
        assert_eq!(timestamps(&second), vec![300, 200]);

        let prev_cursor = second.prev_cursor.clone().unwrap();
        assert_eq!(prev_cursor, "400");
        let back = queries
            .list_deposits(&params(&[
                ("poolId", &filter),
                ("limit", "2"),
                ("cursor", &prev_cursor),
                ("direction", "prev"),
            ]))
            .await
            .unwrap();
        assert_eq!(timestamps(&back), vec![500]);
        assert_eq!(back.prev_cursor.as_deref(), Some("400"));
    }

    #[tokio::test]
    async fn test_rows_tied_at_page_boundary_are_skipped() {
        let (engine, queries) = seeded().await;
        engine.apply(&deposit(POOL_A, 0xd0, 5, 300)).await.unwrap();
        let filter = hex_key(POOL_A);

        let first = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "3")]))
            .await
            .unwrap();
        assert_eq!(timestamps(&first), vec![500, 400, 300]);
        assert_eq!(first.items[2].id, hex_key(B256::repeat_byte(0xd0)));
        assert_eq!(first.next_cursor.as_deref(), Some("300"));

        let second = queries
            .list_deposits(&params(&[("poolId", &filter), ("limit", "3"), ("cursor", "300")]))
            .await
            .unwrap();
        assert_eq!(timestamps(&second), vec![200, 100]);
        assert!(second
            .items
            .iter()
            .all(|d| d.id != hex_key(B256::repeat_byte(0xc2))));
    }

    #[tokio::test]
    async fn test_unfiltered_listing_spans_pools() {
        let (_engine, queries) = seeded().await;

        let page = queries.list_deposits(&PageRequest::default()).await.unwrap();
        assert_eq!(timestamps(&page), vec![500, 400, 300, 250, 200, 100]);
        assert_eq!(page.next_cursor, None);

        let withdrawals = queries
            .list_withdrawals(&PageRequest::default())
            .await
            .unwrap();
        assert_eq!(withdrawals.items.len(), 1);
        assert_eq!(
            withdrawals.items[0].deposit_id,
            Some(hex_key(B256::repeat_byte(0xc0)))
        );
    }

    #[tokio::test]
    async fn test_prev_past_newest_is_empty() {
        let (_engine, queries) = seeded().await;
        let page = queries
            .list_deposits(&params(&[("cursor", "500"), ("direction", "prev")]))
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.prev_cursor.as_deref(), Some("500"));
    }

    #[tokio::test]
    async fn test_pool_snapshot() {
        let (_engine, queries) = seeded().await;

        let snapshot = queries.get_pool(&POOL_A.to_string()).await.unwrap();
        assert_eq!(snapshot.pool.total_deposits, 5);
        assert_eq!(snapshot.pool.last_leaf_index, 4);
        assert_eq!(snapshot.deposits.len(), 5);
        assert_eq!(snapshot.withdrawals.len(), 1);
        assert!(snapshot.deposits.iter().any(|d| d.is_spent));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["denomination"], "100000000000000000");
        assert_eq!(json["totalDeposits"], 5);
        assert_eq!(json["deposits"][0]["timestamp"], "500");

        assert_eq!(queries.get_pools().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_lookups_not_found() {
        let (_engine, queries) = seeded().await;
        let missing = B256::repeat_byte(0x77).to_string();

        assert!(matches!(
            queries.get_pool(&Address::repeat_byte(0x99).to_string()).await,
            Err(QueryError::NotFound("Pool"))
        ));
        assert!(matches!(
            queries.get_commitment(&missing).await,
            Err(QueryError::NotFound("Commitment"))
        ));
        assert!(matches!(
            queries.get_nullifier(&missing).await,
            Err(QueryError::NotFound("Nullifier"))
        ));
        assert!(matches!(
            queries.get_pool("not-an-address").await,
            Err(QueryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_point_lookups() {
        let (_engine, queries) = seeded().await;

        let commitment = queries
            .get_commitment(&B256::repeat_byte(0xc3).to_string())
            .await
            .unwrap();
        assert_eq!(commitment.leaf_index, 3);
        assert_eq!(commitment.pool_id, hex_key(POOL_A));

        let nullifier = queries
            .get_nullifier(&B256::repeat_byte(0xc0).to_string())
            .await
            .unwrap();
        assert_eq!(nullifier.timestamp, 600);
    }

    #[tokio::test]
    async fn test_stats() {
        let (_engine, queries) = seeded().await;
        let stats = queries.get_stats().await.unwrap();

        assert_eq!(stats.total_deposits, 6);
        assert_eq!(stats.total_withdrawals, 1);
        assert_eq!(
            stats.pool_stats,
            vec![
                PoolStats {
                    pool_id: hex_key(POOL_A),
                    denomination: "0.1".into(),
                    deposits: 5,
                    withdrawals: 1,
                },
                PoolStats {
                    pool_id: hex_key(POOL_B),
                    denomination: "1".into(),
                    deposits: 1,
                    withdrawals: 0,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stats_rejects_malformed_denomination() {
        let (engine, queries) = seeded().await;
        sqlx::query("UPDATE pools SET denomination = 'ten' WHERE id = ?1")
            .bind(hex_key(POOL_B))
            .execute(engine.database().pool())
            .await
            .unwrap();

        assert!(matches!(
            queries.get_stats().await,
            Err(QueryError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_list_roots() {
        let (engine, queries) = seeded().await;
        ledger::record_root(engine.database().pool(), &POOL_A, &B256::repeat_byte(0x5e), 150)
            .await
            .unwrap();

        let roots = queries.list_roots(&POOL_A.to_string()).await.unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].root, hex_key(B256::repeat_byte(0x5e)));
        assert!(queries.list_roots(&POOL_B.to_string()).await.unwrap().is_empty());
        assert!(matches!(
            queries.list_roots(&Address::repeat_byte(0x99).to_string()).await,
            Err(QueryError::NotFound("Pool"))
        ));
    }
}
