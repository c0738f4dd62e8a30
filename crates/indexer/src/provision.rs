//! Reads of immutable pool metadata used when a pool is first seen

use alloy_primitives::{hex, Address, Bytes};
use alloy_sol_types::SolCall;
use async_trait::async_trait;

use crate::error::{IndexerError, IndexerResult};
use veil_contracts::IVeilPool;

/// On-chain fields fixed at pool deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolMetadata {
    pub validator_contract: Address,
    pub veil_deployer: Address,
}

#[async_trait]
pub trait PoolMetadataSource: Send + Sync {
    async fn pool_metadata(&self, pool: Address) -> IndexerResult<PoolMetadata>;
}

/// Fixed metadata for every pool, for offline runs
#[derive(Clone, Debug)]
pub struct StaticMetadata(pub PoolMetadata);

#[async_trait]
impl PoolMetadataSource for StaticMetadata {
    async fn pool_metadata(&self, _pool: Address) -> IndexerResult<PoolMetadata> {
        Ok(self.0.clone())
    }
}

/// `eth_call` based metadata reads
pub struct RpcMetadataSource {
    rpc_url: String,
    http_client: reqwest::Client,
}

impl RpcMetadataSource {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            http_client: reqwest::Client::new(),
        }
    }

    async fn call<C: SolCall>(&self, to: Address, call: C) -> IndexerResult<C::Return> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [
                {
                    "to": format!("{:?}", to),
                    "data": hex::encode_prefixed(call.abi_encode()),
                },
                "latest"
            ],
            "id": 1,
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexerError::Provision(e.to_string()))?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IndexerError::Provision(e.to_string()))?;

        if let Some(error) = json.get("error") {
            return Err(IndexerError::Provision(error.to_string()));
        }

        let result = json
            .get("result")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexerError::Provision("No result in response".into()))?;

        let data: Bytes = result
            .parse()
            .map_err(|_| IndexerError::Provision(format!("Invalid hex result: {}", result)))?;

        C::abi_decode_returns(&data).map_err(|e| {
            IndexerError::Provision(format!("{} returned undecodable data: {}", C::SIGNATURE, e))
        })
    }
}

#[async_trait]
impl PoolMetadataSource for RpcMetadataSource {
    async fn pool_metadata(&self, pool: Address) -> IndexerResult<PoolMetadata> {
        let (validator_contract, veil_deployer) = tokio::try_join!(
            self.call(pool, IVeilPool::validatorContractCall {}),
            self.call(pool, IVeilPool::veilDeployerCall {}),
        )?;

        tracing::debug!(
            "Read metadata for pool {:?}: validator={:?}, deployer={:?}",
            pool,
            validator_contract,
            veil_deployer
        );

        Ok(PoolMetadata {
            validator_contract,
            veil_deployer,
        })
    }
}
