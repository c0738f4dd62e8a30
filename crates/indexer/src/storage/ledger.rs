//! Ledger tables: deposits, withdrawals, commitments, nullifiers, roots
//!
//! Rows are keyed by content hash and owned by exactly one pool. Inserts use
//! conflict-ignore where a repeat is an expected duplicate delivery, and plain
//! inserts where a conflict would mean corrupted state.

use alloy_primitives::{Address, B256};
use sqlx::sqlite::SqliteExecutor;
use veil_contracts::{DepositEvent, WithdrawalEvent};

use super::{hex_key, CommitmentRow, DepositRow, NullifierRow, RootRow, WithdrawalRow};

pub const DEPOSIT_COLUMNS: &str = "id, pool_id, sender, leaf_index, timestamp, is_spent";
pub const WITHDRAWAL_COLUMNS: &str =
    "id, pool_id, recipient, relayer, fee, timestamp, deposit_id";

// === Deposits ===

/// Returns `false` when a deposit with this commitment already exists.
pub async fn insert_deposit<'e, E: SqliteExecutor<'e>>(
    exec: E,
    event: &DepositEvent,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO deposits (id, pool_id, sender, leaf_index, timestamp, is_spent)
        VALUES (?, ?, ?, ?, ?, 0)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(hex_key(event.commitment))
    .bind(hex_key(event.pool))
    .bind(hex_key(event.sender))
    .bind(event.leaf_index as i64)
    .bind(event.timestamp as i64)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find_deposit<'e, E: SqliteExecutor<'e>>(
    exec: E,
    commitment: &B256,
) -> Result<Option<DepositRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE id = ?"))
        .bind(hex_key(commitment))
        .fetch_optional(exec)
        .await
}

/// Flip `is_spent` false -> true. Returns `false` if it was already spent.
pub async fn mark_deposit_spent<'e, E: SqliteExecutor<'e>>(
    exec: E,
    commitment: &B256,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE deposits SET is_spent = 1 WHERE id = ? AND is_spent = 0")
        .bind(hex_key(commitment))
        .execute(exec)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn deposits_for_pool<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pool_id: &str,
) -> Result<Vec<DepositRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE pool_id = ? ORDER BY timestamp DESC, id DESC"
    ))
    .bind(pool_id)
    .fetch_all(exec)
    .await
}

pub async fn count_deposits<'e, E: SqliteExecutor<'e>>(exec: E) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM deposits")
        .fetch_one(exec)
        .await?;
    Ok(count)
}

// === Commitments ===

pub async fn insert_commitment<'e, E: SqliteExecutor<'e>>(
    exec: E,
    event: &DepositEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO commitments (hash, pool_id, leaf_index, timestamp)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(hex_key(event.commitment))
    .bind(hex_key(event.pool))
    .bind(event.leaf_index as i64)
    .bind(event.timestamp as i64)
    .execute(exec)
    .await?;

    Ok(())
}

pub async fn find_commitment<'e, E: SqliteExecutor<'e>>(
    exec: E,
    hash: &B256,
) -> Result<Option<CommitmentRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT hash, pool_id, leaf_index, timestamp
        FROM commitments
        WHERE hash = ?
        ORDER BY pool_id
        LIMIT 1
        "#,
    )
    .bind(hex_key(hash))
    .fetch_optional(exec)
    .await
}

// === Withdrawals & nullifiers ===

pub async fn nullifier_exists<'e, E: SqliteExecutor<'e>>(
    exec: E,
    nullifier: &B256,
) -> Result<bool, sqlx::Error> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM nullifier_hashes WHERE hash = ?)")
            .bind(hex_key(nullifier))
            .fetch_one(exec)
            .await?;
    Ok(exists)
}

/// Returns `false` if the nullifier was already recorded; never writes a second row.
pub async fn insert_nullifier<'e, E: SqliteExecutor<'e>>(
    exec: E,
    event: &WithdrawalEvent,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO nullifier_hashes (hash, pool_id, timestamp)
        VALUES (?, ?, ?)
        ON CONFLICT(hash) DO NOTHING
        "#,
    )
    .bind(hex_key(event.nullifier_hash))
    .bind(hex_key(event.pool))
    .bind(event.timestamp as i64)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn find_nullifier<'e, E: SqliteExecutor<'e>>(
    exec: E,
    hash: &B256,
) -> Result<Option<NullifierRow>, sqlx::Error> {
    sqlx::query_as("SELECT hash, pool_id, timestamp FROM nullifier_hashes WHERE hash = ?")
        .bind(hex_key(hash))
        .fetch_optional(exec)
        .await
}

pub async fn insert_withdrawal<'e, E: SqliteExecutor<'e>>(
    exec: E,
    event: &WithdrawalEvent,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO withdrawals (id, pool_id, recipient, relayer, fee, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(hex_key(event.nullifier_hash))
    .bind(hex_key(event.pool))
    .bind(hex_key(event.recipient))
    .bind(hex_key(event.relayer))
    .bind(event.fee.to_string())
    .bind(event.timestamp as i64)
    .execute(exec)
    .await?;

    Ok(())
}

/// Record which deposit a withdrawal spent
pub async fn link_withdrawal<'e, E: SqliteExecutor<'e>>(
    exec: E,
    nullifier: &B256,
    commitment: &B256,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE withdrawals SET deposit_id = ? WHERE id = ?")
        .bind(hex_key(commitment))
        .bind(hex_key(nullifier))
        .execute(exec)
        .await?;
    Ok(())
}

pub async fn withdrawals_for_pool<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pool_id: &str,
) -> Result<Vec<WithdrawalRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE pool_id = ? ORDER BY timestamp DESC, id DESC"
    ))
    .bind(pool_id)
    .fetch_all(exec)
    .await
}

pub async fn count_withdrawals<'e, E: SqliteExecutor<'e>>(exec: E) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM withdrawals")
        .fetch_one(exec)
        .await?;
    Ok(count)
}

// === Merkle roots ===

/// Returns `false` if this (root, pool) snapshot already exists.
pub async fn record_root<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pool: &Address,
    root: &B256,
    timestamp: u64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO merkle_roots (root, pool_id, timestamp)
        VALUES (?, ?, ?)
        ON CONFLICT(root, pool_id) DO NOTHING
        "#,
    )
    .bind(hex_key(root))
    .bind(hex_key(pool))
    .bind(timestamp as i64)
    .execute(exec)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn roots_for_pool<'e, E: SqliteExecutor<'e>>(
    exec: E,
    pool_id: &str,
) -> Result<Vec<RootRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT root, pool_id, timestamp
        FROM merkle_roots
        WHERE pool_id = ?
        ORDER BY timestamp DESC, root DESC
        "#,
    )
    .bind(pool_id)
    .fetch_all(exec)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{pools, Database, NewPool};
    use alloy_primitives::U256;

    fn pool_address() -> Address {
        Address::repeat_byte(0x0a)
    }

    async fn setup() -> Database {
        let db = Database::in_memory().await.unwrap();
        pools::insert_if_absent(
            db.pool(),
            &NewPool {
                address: pool_address(),
                denomination: U256::from(1u64),
                validator_contract: Address::ZERO,
                veil_deployer: Address::ZERO,
            },
        )
        .await
        .unwrap();
        db
    }

    fn deposit(byte: u8, ts: u64) -> DepositEvent {
        DepositEvent {
            pool: pool_address(),
            commitment: B256::repeat_byte(byte),
            sender: Address::repeat_byte(0x11),
            leaf_index: byte as u32,
            timestamp: ts,
        }
    }

    fn withdrawal(byte: u8, ts: u64) -> WithdrawalEvent {
        WithdrawalEvent {
            pool: pool_address(),
            nullifier_hash: B256::repeat_byte(byte),
            recipient: Address::repeat_byte(0x22),
            relayer: Address::repeat_byte(0x33),
            fee: U256::from(5u64),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn test_deposit_insert_is_conflict_ignored() {
        let db = setup().await;
        let event = deposit(0xc1, 100);

        assert!(insert_deposit(db.pool(), &event).await.unwrap());
        assert!(!insert_deposit(db.pool(), &event).await.unwrap());
        assert_eq!(count_deposits(db.pool()).await.unwrap(), 1);

        let row = find_deposit(db.pool(), &event.commitment).await.unwrap().unwrap();
        assert!(!row.is_spent);
        assert_eq!(row.leaf_index, 0xc1);
    }

    #[tokio::test]
    async fn test_mark_spent_only_once() {
        let db = setup().await;
        let event = deposit(0xc2, 100);
        insert_deposit(db.pool(), &event).await.unwrap();

        assert!(mark_deposit_spent(db.pool(), &event.commitment).await.unwrap());
        assert!(!mark_deposit_spent(db.pool(), &event.commitment).await.unwrap());
        assert!(!mark_deposit_spent(db.pool(), &B256::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_nullifier_recorded_at_most_once() {
        let db = setup().await;
        let event = withdrawal(0xa1, 300);

        assert!(!nullifier_exists(db.pool(), &event.nullifier_hash).await.unwrap());
        assert!(insert_nullifier(db.pool(), &event).await.unwrap());
        assert!(!insert_nullifier(db.pool(), &event).await.unwrap());
        assert!(nullifier_exists(db.pool(), &event.nullifier_hash).await.unwrap());

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nullifier_hashes")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_withdrawal_link_and_fee_text() {
        let db = setup().await;
        let dep = deposit(0xc3, 100);
        let wd = withdrawal(0xa2, 300);
        insert_deposit(db.pool(), &dep).await.unwrap();
        insert_withdrawal(db.pool(), &wd).await.unwrap();
        link_withdrawal(db.pool(), &wd.nullifier_hash, &dep.commitment)
            .await
            .unwrap();

        let rows = withdrawals_for_pool(db.pool(), &hex_key(pool_address()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fee, "5");
        assert_eq!(rows[0].deposit_id, Some(hex_key(dep.commitment)));
        assert_eq!(count_withdrawals(db.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commitment_lookup() {
        let db = setup().await;
        let dep = deposit(0x07, 150);
        insert_commitment(db.pool(), &dep).await.unwrap();
        assert!(insert_commitment(db.pool(), &dep).await.is_err());

        let row = find_commitment(db.pool(), &dep.commitment).await.unwrap().unwrap();
        assert_eq!(row.leaf_index, 7);
        assert_eq!(row.timestamp, 150);
        assert!(find_commitment(db.pool(), &B256::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_roots_are_deduplicated_per_pool() {
        let db = setup().await;
        let root = B256::repeat_byte(0x5e);

        assert!(record_root(db.pool(), &pool_address(), &root, 10).await.unwrap());
        assert!(!record_root(db.pool(), &pool_address(), &root, 11).await.unwrap());
        record_root(db.pool(), &pool_address(), &B256::repeat_byte(0x5f), 20)
            .await
            .unwrap();

        let roots = roots_for_pool(db.pool(), &hex_key(pool_address()))
            .await
            .unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].timestamp, 20);
    }
}
