use alloy_primitives::utils::{format_units, parse_ether, UnitsError};
use alloy_primitives::{Address, U256};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{IndexerError, IndexerResult};

/// Base mainnet Veil pools and their fixed deposit size in ETH
const BASE_POOLS: [(&str, &str); 5] = [
    ("0x6c206B5389de4e5a23FdF13BF38104CE8Dd2eD5f", "0.005"),
    ("0xC53510D6F535Ba0943b1007f082Af3410fBeA4F7", "0.05"),
    ("0x844bB2917dD363Be5567f9587151c2aAa2E345D2", "0.01"),
    ("0xD3560eF60Dd06E27b699372c3da1b741c80B7D90", "0.1"),
    ("0x9cCdFf5f69d93F4Fcd6bE81FeB7f79649cb6319b", "1"),
];

/// Static pool address -> denomination (wei) mapping.
///
/// Only pools listed here can be provisioned; events from any other address
/// are rejected as [`IndexerError::UnknownPool`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DenominationRegistry {
    pools: BTreeMap<Address, U256>,
}

impl DenominationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The five production pools on Base
    pub fn base_mainnet() -> Self {
        let mut registry = Self::new();
        for (address, ether) in BASE_POOLS {
            // Constants above are well-formed.
            if let (Ok(address), Ok(wei)) = (address.parse(), parse_ether(ether)) {
                registry.insert(address, wei);
            }
        }
        registry
    }

    /// Parse `address=ether` pairs separated by commas,
    /// e.g. `0xabc...=0.1,0xdef...=1`
    pub fn parse(pairs: &str) -> Result<Self, String> {
        let mut registry = Self::new();
        for entry in pairs.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (address, ether) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected address=ether, got {entry:?}"))?;
            let address: Address = address
                .trim()
                .parse()
                .map_err(|_| format!("invalid pool address {address:?}"))?;
            let wei = parse_ether(ether.trim())
                .map_err(|e| format!("invalid denomination {ether:?}: {e}"))?;
            registry.insert(address, wei);
        }
        if registry.is_empty() {
            return Err("no pools configured".into());
        }
        Ok(registry)
    }

    pub fn insert(&mut self, pool: Address, denomination: U256) {
        self.pools.insert(pool, denomination);
    }

    pub fn with_pool(mut self, pool: Address, denomination: U256) -> Self {
        self.insert(pool, denomination);
        self
    }

    /// Denomination in wei for a configured pool
    pub fn lookup(&self, pool: &Address) -> IndexerResult<U256> {
        self.pools
            .get(pool)
            .copied()
            .ok_or(IndexerError::UnknownPool(*pool))
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.pools.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Render wei as ETH without trailing zeros, e.g. `"0.005"`
pub fn format_ether(wei: U256) -> Result<String, UnitsError> {
    let ether = format_units(wei, "ether")?;
    Ok(match ether.split_once('.') {
        Some((whole, frac)) if frac.trim_end_matches('0').is_empty() => whole.to_string(),
        Some(_) => ether.trim_end_matches('0').to_string(),
        None => ether,
    })
}

/// Indexer configuration
#[derive(Clone, Debug)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint used for log sync and pool metadata reads
    pub rpc_url: String,

    /// Chain ID (8453 = Base)
    pub chain_id: u64,

    /// First block to scan when no checkpoint exists
    pub start_block: u64,

    /// Blocks to stay behind the head before ingesting
    pub confirmations: u64,

    /// Block range per eth_getLogs request
    pub batch_size: u64,

    /// Delay between sync rounds once caught up
    pub poll_interval: Duration,

    /// Pools to index
    pub pools: DenominationRegistry,

    /// Treat a withdrawal's nullifier hash as the commitment of the deposit it
    /// spends, marking that deposit spent
    pub link_nullifiers: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://mainnet.base.org".into(),
            chain_id: 8453,
            start_block: 24_532_655,
            confirmations: 10,
            batch_size: 2_000,
            poll_interval: Duration::from_secs(12),
            pools: DenominationRegistry::base_mainnet(),
            link_nullifiers: true,
        }
    }
}

impl IndexerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("VEIL_RPC_URL") {
            config.rpc_url = val;
        }

        if let Ok(val) = std::env::var("VEIL_CHAIN_ID") {
            if let Ok(id) = val.parse() {
                config.chain_id = id;
            }
        }

        if let Ok(val) = std::env::var("VEIL_START_BLOCK") {
            if let Ok(block) = val.parse() {
                config.start_block = block;
            }
        }

        if let Ok(val) = std::env::var("VEIL_CONFIRMATIONS") {
            if let Ok(n) = val.parse() {
                config.confirmations = n;
            }
        }

        if let Ok(val) = std::env::var("VEIL_BATCH_SIZE") {
            if let Ok(n) = val.parse::<u64>() {
                config.batch_size = n.max(1);
            }
        }

        if let Ok(val) = std::env::var("VEIL_POLL_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.poll_interval = Duration::from_secs(secs);
            }
        }

        if let Ok(val) = std::env::var("VEIL_POOLS") {
            match DenominationRegistry::parse(&val) {
                Ok(pools) => config.pools = pools,
                Err(e) => tracing::warn!("Ignoring VEIL_POOLS: {}", e),
            }
        }

        if let Ok(val) = std::env::var("VEIL_LINK_NULLIFIERS") {
            config.link_nullifiers = val.parse().unwrap_or(config.link_nullifiers);
        }

        config
    }
}
