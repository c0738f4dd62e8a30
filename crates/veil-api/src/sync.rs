//! Chain log syncer
//!
//! Pulls VeilPool logs over JSON-RPC in block batches and feeds them to the
//! ingestor. The checkpoint in `sync_state` only advances after a batch is
//! fully applied, so a failed batch is retried from the same block.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_rpc_types::Log;
use serde_json::{json, Value};
use thiserror::Error;
use veil_contracts::{event_signatures, RawLog};
use veil_indexer::{Database, IndexerConfig, IndexerError, Ingestor};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    ParseFailed(String),

    #[error(transparent)]
    Indexer(#[from] IndexerError),
}

pub struct LogSyncer {
    rpc_url: String,
    http_client: reqwest::Client,
    chain_id: u64,
    start_block: u64,
    confirmations: u64,
    batch_size: u64,
    poll_interval: Duration,
    pools: Vec<Address>,
    ingestor: Arc<Ingestor>,
    db: Arc<Database>,
}

impl LogSyncer {
    pub fn new(config: &IndexerConfig, ingestor: Arc<Ingestor>) -> Self {
        let db = ingestor.reconciler().database().clone();
        Self {
            rpc_url: config.rpc_url.clone(),
            http_client: reqwest::Client::new(),
            chain_id: config.chain_id,
            start_block: config.start_block,
            confirmations: config.confirmations,
            batch_size: config.batch_size.max(1),
            poll_interval: config.poll_interval,
            pools: config.pools.addresses(),
            ingestor,
            db,
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, SyncError> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let mut json: Value = response
            .json()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        if let Some(error) = json.get("error") {
            return Err(SyncError::Transport(error.to_string()));
        }

        json.get_mut("result")
            .map(Value::take)
            .ok_or_else(|| SyncError::Transport("No result in response".into()))
    }

    /// Current head via eth_blockNumber
    pub async fn get_block_number(&self) -> Result<u64, SyncError> {
        let result = self.rpc("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| SyncError::ParseFailed(format!("Invalid block number: {}", result)))?;

        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| SyncError::ParseFailed(format!("Invalid block number: {}", e)))
    }

    /// All pool logs in `[from_block, to_block]`
    pub async fn fetch_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<RawLog>, SyncError> {
        let signatures: Vec<String> = event_signatures()
            .iter()
            .map(|s| format!("{:?}", s))
            .collect();
        let addresses: Vec<String> = self.pools.iter().map(|a| format!("{:?}", a)).collect();

        let filter = json!({
            "address": addresses,
            "topics": [signatures],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        let result = self.rpc("eth_getLogs", json!([filter])).await?;
        let logs: Vec<Log> =
            serde_json::from_value(result).map_err(|e| SyncError::ParseFailed(e.to_string()))?;

        logs.into_iter()
            .filter(|log| !log.removed)
            .map(|log| {
                let block_number = log
                    .block_number
                    .ok_or_else(|| SyncError::ParseFailed("Log without block number".into()))?;
                let log_index = log
                    .log_index
                    .ok_or_else(|| SyncError::ParseFailed("Log without log index".into()))?;
                Ok(RawLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.clone(),
                    block_number,
                    log_index,
                })
            })
            .collect()
    }

    /// Catch up to `head - confirmations`.
    ///
    /// Returns the new checkpoint, or `None` when already caught up.
    pub async fn sync_once(&self) -> Result<Option<u64>, SyncError> {
        let head = self.get_block_number().await?;
        let target = head.saturating_sub(self.confirmations);

        let mut next = match self.db.last_synced_block(self.chain_id).await? {
            Some(block) => block + 1,
            None => self.start_block,
        };
        if next > target {
            return Ok(None);
        }

        while next <= target {
            let end = (next + self.batch_size - 1).min(target);
            tracing::info!("Syncing blocks {} to {}", next, end);

            let logs = self.fetch_logs(next, end).await?;
            let report = self.ingestor.ingest_logs(&logs).await?;
            self.db.set_last_synced_block(self.chain_id, end).await?;

            if report.applied + report.duplicates + report.rejected > 0 {
                tracing::info!(
                    "Blocks {}-{}: applied={}, duplicates={}, rejected={}",
                    next,
                    end,
                    report.applied,
                    report.duplicates,
                    report.rejected
                );
            }
            next = end + 1;
        }

        Ok(Some(target))
    }

    /// Poll forever; failed rounds are logged and retried after the interval
    pub async fn run(self) {
        tracing::info!(
            "Log syncer started: chain={}, pools={}, confirmations={}",
            self.chain_id,
            self.pools.len(),
            self.confirmations
        );

        loop {
            match self.sync_once().await {
                Ok(Some(block)) => tracing::debug!("Synced to block {}", block),
                Ok(None) => {}
                Err(e) => tracing::warn!("Sync round failed: {}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
