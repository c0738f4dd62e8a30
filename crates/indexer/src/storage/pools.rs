//! Pool state store
//!
//! One row per pool, created lazily on first sight and mutated by every event
//! for that pool. All mutations run inside the caller's transaction.

use alloy_primitives::Address;
use sqlx::sqlite::SqliteExecutor;
use sqlx::SqliteConnection;

use super::{hex_key, NewPool, PoolRow};
use crate::error::{IndexerError, IndexerResult};

const POOL_COLUMNS: &str = "id, denomination, total_deposits, total_withdrawals, \
                            last_leaf_index, validator_contract, veil_deployer";

pub async fn find<'e, E: SqliteExecutor<'e>>(
    exec: E,
    address: &Address,
) -> Result<Option<PoolRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {POOL_COLUMNS} FROM pools WHERE id = ?"))
        .bind(hex_key(address))
        .fetch_optional(exec)
        .await
}

pub async fn list<'e, E: SqliteExecutor<'e>>(exec: E) -> Result<Vec<PoolRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {POOL_COLUMNS} FROM pools ORDER BY id"))
        .fetch_all(exec)
        .await
}

/// Insert-if-absent. Returns `true` when this call created the row.
pub async fn insert_if_absent<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pool: &NewPool,
) -> IndexerResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO pools (id, denomination, validator_contract, veil_deployer)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(hex_key(pool.address))
    .bind(pool.denomination.to_string())
    .bind(hex_key(pool.validator_contract))
    .bind(hex_key(pool.veil_deployer))
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Get-or-create.
///
/// `provisioned` carries the metadata for a pool that was absent when the
/// caller checked; it is inserted with conflict-ignore so concurrent first
/// sightings create at most one row.
pub async fn ensure(
    conn: &mut SqliteConnection,
    address: &Address,
    provisioned: Option<&NewPool>,
) -> IndexerResult<PoolRow> {
    if let Some(new_pool) = provisioned {
        if insert_if_absent(&mut *conn, new_pool).await? {
            tracing::info!(
                "Provisioned pool {:?} (denomination {} wei)",
                address,
                new_pool.denomination
            );
        }
    }

    find(&mut *conn, address)
        .await?
        .ok_or_else(|| IndexerError::Integrity(format!("pool {:?} was never provisioned", address)))
}

/// totalDeposits += 1, lastLeafIndex = max(lastLeafIndex, leaf_index)
pub async fn increment_deposits<'e, E: SqliteExecutor<'e>>(
    exec: E,
    address: &Address,
    leaf_index: u32,
) -> IndexerResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE pools
        SET total_deposits = total_deposits + 1,
            last_leaf_index = MAX(last_leaf_index, ?)
        WHERE id = ?
        "#,
    )
    .bind(leaf_index as i64)
    .bind(hex_key(address))
    .execute(exec)
    .await?;

    expect_one(result.rows_affected(), address)
}

pub async fn increment_withdrawals<'e, E: SqliteExecutor<'e>>(
    exec: E,
    address: &Address,
) -> IndexerResult<()> {
    let result =
        sqlx::query("UPDATE pools SET total_withdrawals = total_withdrawals + 1 WHERE id = ?")
            .bind(hex_key(address))
            .execute(exec)
            .await?;

    expect_one(result.rows_affected(), address)
}

/// Last write wins
pub async fn set_validator<'e, E: SqliteExecutor<'e>>(
    exec: E,
    address: &Address,
    validator: &Address,
) -> IndexerResult<()> {
    let result = sqlx::query("UPDATE pools SET validator_contract = ? WHERE id = ?")
        .bind(hex_key(validator))
        .bind(hex_key(address))
        .execute(exec)
        .await?;

    expect_one(result.rows_affected(), address)
}

fn expect_one(rows: u64, address: &Address) -> IndexerResult<()> {
    if rows == 1 {
        Ok(())
    } else {
        Err(IndexerError::Integrity(format!(
            "pool {:?} missing during update",
            address
        )))
    }
}
