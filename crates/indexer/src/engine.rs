//! Reconciler - applies pool events to derived state
//!
//! Each event is applied in a single SQLite transaction:
//! - Deposit: ledger row, pool counters, commitment leaf
//! - Withdrawal: ledger row, nullifier record, pool counter, spent flag
//! - ValidatorChanged: validator reassignment
//!
//! Re-delivered Deposit/Withdrawal events are detected by key and skipped,
//! so applying the same input twice is a no-op. Events must arrive in
//! on-chain order per pool; nothing is reordered here.

use alloy_primitives::Address;
use std::sync::Arc;

use crate::config::DenominationRegistry;
use crate::error::{IndexerError, IndexerResult};
use crate::provision::PoolMetadataSource;
use crate::storage::{hex_key, ledger, pools, Database, NewPool};
use veil_contracts::{
    DepositEvent, PoolEvent, ValidatorChangedEvent, WithdrawalEvent, MAX_TIMESTAMP,
};

/// What happened to an event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// All effects committed
    Applied,
    /// Already applied earlier; nothing changed
    Duplicate,
}

pub struct Reconciler {
    db: Arc<Database>,
    registry: Arc<DenominationRegistry>,
    metadata: Arc<dyn PoolMetadataSource>,
    link_nullifiers: bool,
}

impl Reconciler {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<DenominationRegistry>,
        metadata: Arc<dyn PoolMetadataSource>,
    ) -> Self {
        Self {
            db,
            registry,
            metadata,
            link_nullifiers: true,
        }
    }

    /// Whether a withdrawal's nullifier hash identifies the deposit it spends
    pub fn with_nullifier_linking(mut self, enabled: bool) -> Self {
        self.link_nullifiers = enabled;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Apply one event atomically
    pub async fn apply(&self, event: &PoolEvent) -> IndexerResult<ApplyOutcome> {
        check_timestamp(event)?;
        let provisioned = self.provision_if_absent(event.pool()).await?;

        let _writer = self.db.writer().await;
        let mut tx = self.db.pool().begin().await?;

        pools::ensure(&mut tx, &event.pool(), provisioned.as_ref()).await?;

        let outcome = match event {
            PoolEvent::Deposit(e) => self.apply_deposit(&mut tx, e).await?,
            PoolEvent::Withdrawal(e) => self.apply_withdrawal(&mut tx, e).await?,
            PoolEvent::ValidatorChanged(e) => self.apply_validator_change(&mut tx, e).await?,
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// Build the pool row for an unseen pool.
    ///
    /// Runs outside the write transaction since it may hit the network; the
    /// insert itself is conflict-ignored, so a concurrent first sighting is
    /// harmless.
    async fn provision_if_absent(&self, pool: Address) -> IndexerResult<Option<NewPool>> {
        if pools::find(self.db.pool(), &pool).await?.is_some() {
            return Ok(None);
        }

        let denomination = self.registry.lookup(&pool)?;
        let metadata = self.metadata.pool_metadata(pool).await?;

        Ok(Some(NewPool {
            address: pool,
            denomination,
            validator_contract: metadata.validator_contract,
            veil_deployer: metadata.veil_deployer,
        }))
    }

    async fn apply_deposit(
        &self,
        conn: &mut sqlx::SqliteConnection,
        event: &DepositEvent,
    ) -> IndexerResult<ApplyOutcome> {
        if !ledger::insert_deposit(&mut *conn, event).await? {
            let existing = ledger::find_deposit(&mut *conn, &event.commitment).await?;
            let pool_key = hex_key(event.pool);
            return match existing {
                Some(row) if row.pool_id != pool_key => Err(IndexerError::Integrity(format!(
                    "commitment {:?} already deposited in pool {}",
                    event.commitment, row.pool_id
                ))),
                _ => {
                    tracing::debug!(
                        "Skipping duplicate deposit: cm={:?}, pool={:?}",
                        event.commitment,
                        event.pool
                    );
                    Ok(ApplyOutcome::Duplicate)
                }
            };
        }

        pools::increment_deposits(&mut *conn, &event.pool, event.leaf_index).await?;
        ledger::insert_commitment(&mut *conn, event).await?;

        tracing::info!(
            "Processed deposit: pool={:?}, cm={:?}, index={}",
            event.pool,
            event.commitment,
            event.leaf_index
        );

        Ok(ApplyOutcome::Applied)
    }

    async fn apply_withdrawal(
        &self,
        conn: &mut sqlx::SqliteConnection,
        event: &WithdrawalEvent,
    ) -> IndexerResult<ApplyOutcome> {
        if ledger::nullifier_exists(&mut *conn, &event.nullifier_hash).await? {
            tracing::debug!(
                "Skipping duplicate withdrawal: nf={:?}, pool={:?}",
                event.nullifier_hash,
                event.pool
            );
            return Ok(ApplyOutcome::Duplicate);
        }

        ledger::insert_withdrawal(&mut *conn, event).await?;
        ledger::insert_nullifier(&mut *conn, event).await?;
        pools::increment_withdrawals(&mut *conn, &event.pool).await?;

        let spent = if self.link_nullifiers {
            self.spend_matching_deposit(conn, event).await?
        } else {
            false
        };

        tracing::info!(
            "Processed withdrawal: pool={:?}, nf={:?}, fee={}, to={:?}, spent_deposit={}",
            event.pool,
            event.nullifier_hash,
            event.fee,
            event.recipient,
            spent
        );

        Ok(ApplyOutcome::Applied)
    }

    /// Mark the deposit keyed by the nullifier hash as spent, if one exists in
    /// the same pool and is still unspent. No match is normal: the deposit may
    /// predate the indexed range.
    async fn spend_matching_deposit(
        &self,
        conn: &mut sqlx::SqliteConnection,
        event: &WithdrawalEvent,
    ) -> IndexerResult<bool> {
        let Some(deposit) = ledger::find_deposit(&mut *conn, &event.nullifier_hash).await? else {
            return Ok(false);
        };

        if deposit.pool_id != hex_key(event.pool) {
            tracing::warn!(
                "Nullifier {:?} matches a deposit in pool {}, not {:?}; leaving it unspent",
                event.nullifier_hash,
                deposit.pool_id,
                event.pool
            );
            return Ok(false);
        }

        if !ledger::mark_deposit_spent(&mut *conn, &event.nullifier_hash).await? {
            return Ok(false);
        }

        ledger::link_withdrawal(&mut *conn, &event.nullifier_hash, &event.nullifier_hash).await?;
        Ok(true)
    }

    async fn apply_validator_change(
        &self,
        conn: &mut sqlx::SqliteConnection,
        event: &ValidatorChangedEvent,
    ) -> IndexerResult<ApplyOutcome> {
        pools::set_validator(&mut *conn, &event.pool, &event.new_validator).await?;

        tracing::info!(
            "Updated validator: pool={:?}, validator={:?}",
            event.pool,
            event.new_validator
        );

        Ok(ApplyOutcome::Applied)
    }
}

/// Timestamps are stored as signed 64-bit integers; reject anything that
/// would wrap instead of storing it out of order.
fn check_timestamp(event: &PoolEvent) -> IndexerResult<()> {
    let timestamp = match event {
        PoolEvent::Deposit(e) => e.timestamp,
        PoolEvent::Withdrawal(e) => e.timestamp,
        PoolEvent::ValidatorChanged(_) => return Ok(()),
    };
    if timestamp > MAX_TIMESTAMP {
        return Err(IndexerError::Integrity(format!(
            "{} timestamp {} exceeds {}",
            event.kind(),
            timestamp,
            MAX_TIMESTAMP
        )));
    }
    Ok(())
}
