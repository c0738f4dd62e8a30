//! Ingestion - feeds decoded events to the reconciler
//!
//! Events are serialized per pool and run in parallel across pools. Each
//! pool has its own async lock, so overlapping batches never interleave
//! events for the same pool.

use alloy_primitives::Address;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::engine::{ApplyOutcome, Reconciler};
use crate::error::{IndexerError, IndexerResult};
use veil_contracts::{DecodeError, PoolEvent, RawLog};

/// Per-batch tally
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub applied: usize,
    pub duplicates: usize,
    /// Events dropped as unknown pool, integrity violation or undecodable
    pub rejected: usize,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
    }
}

pub struct Ingestor {
    reconciler: Arc<Reconciler>,
    locks: Arc<DashMap<Address, Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    fn lock_for(&self, pool: Address) -> Arc<Mutex<()>> {
        self.locks.entry(pool).or_default().clone()
    }

    /// Apply a single event under its pool's lock
    pub async fn ingest_one(&self, event: &PoolEvent) -> IndexerResult<ApplyOutcome> {
        let lock = self.lock_for(event.pool());
        let _guard = lock.lock().await;
        self.reconciler.apply(event).await
    }

    /// Apply a batch of events already in on-chain order.
    ///
    /// Rejected events are logged and counted. Any other failure stops that
    /// pool's stream at the failing event; the first such error is returned
    /// once every pool's task has finished.
    pub async fn ingest(&self, events: Vec<PoolEvent>) -> IndexerResult<IngestReport> {
        let mut by_pool: BTreeMap<Address, Vec<PoolEvent>> = BTreeMap::new();
        for event in events {
            by_pool.entry(event.pool()).or_default().push(event);
        }

        let mut tasks = JoinSet::new();
        for (pool, events) in by_pool {
            let reconciler = self.reconciler.clone();
            let lock = self.lock_for(pool);
            tasks.spawn(async move {
                let _guard = lock.lock_owned().await;
                apply_stream(&reconciler, pool, events).await
            });
        }

        let mut report = IngestReport::default();
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(pool_report)) => report.merge(pool_report),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(IndexerError::Task(e.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Decode raw logs, order them by (block, log index), and ingest.
    ///
    /// Logs with an unrecognized topic are ignored; logs that match a known
    /// event but fail to decode count as rejected.
    pub async fn ingest_logs(&self, logs: &[RawLog]) -> IndexerResult<IngestReport> {
        let mut ordered: Vec<&RawLog> = logs.iter().collect();
        ordered.sort_by_key(|log| (log.block_number, log.log_index));

        let mut events = Vec::with_capacity(ordered.len());
        let mut undecodable = 0;
        for log in ordered {
            match PoolEvent::decode(log) {
                Ok(event) => events.push(event),
                Err(DecodeError::UnknownEvent(topic)) => {
                    tracing::debug!(
                        "Ignoring log with unknown topic {:?} at block {}",
                        topic,
                        log.block_number
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Rejected undecodable log at block {} index {}: {}",
                        log.block_number,
                        log.log_index,
                        e
                    );
                    undecodable += 1;
                }
            }
        }

        let mut report = self.ingest(events).await?;
        report.rejected += undecodable;
        Ok(report)
    }
}

async fn apply_stream(
    reconciler: &Reconciler,
    pool: Address,
    events: Vec<PoolEvent>,
) -> IndexerResult<IngestReport> {
    let mut report = IngestReport::default();

    for event in &events {
        match reconciler.apply(event).await {
            Ok(ApplyOutcome::Applied) => report.applied += 1,
            Ok(ApplyOutcome::Duplicate) => report.duplicates += 1,
            Err(e) if e.is_event_fatal() => {
                tracing::warn!("Rejected {} event for pool {:?}: {}", event.kind(), pool, e);
                report.rejected += 1;
            }
            Err(e) => {
                tracing::error!(
                    "Stopping ingestion for pool {:?} at {} event: {}",
                    pool,
                    event.kind(),
                    e
                );
                return Err(e);
            }
        }
    }

    Ok(report)
}
