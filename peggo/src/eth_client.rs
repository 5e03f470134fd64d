// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::Peggy;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metered_eth_provider::{new_metered_eth_provider, MeteredEthHttpProvider};
use crate::metrics::OrchestratorMetrics;
use ethers::contract::ContractError;
use ethers::providers::{JsonRpcClient, Middleware, Provider};
use ethers::types::{Address as EthAddress, BlockNumber, Filter, Log, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;

#[cfg(test)]
use crate::eth_mock_provider::EthMockProvider;

pub struct EthClient<P> {
    provider: Arc<Provider<P>>,
    peggy: Peggy<Provider<P>>,
    peggy_address: EthAddress,
    expected_chain_id: Option<u64>,
}

impl EthClient<MeteredEthHttpProvider> {
    pub async fn new(
        provider_url: &str,
        peggy_address: EthAddress,
        metrics: Arc<OrchestratorMetrics>,
        expected_chain_id: Option<u64>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let provider = Arc::new(new_metered_eth_provider(provider_url, metrics, timeout)?);
        let self_ = Self {
            peggy: Peggy::new(peggy_address, provider.clone()),
            provider,
            peggy_address,
            expected_chain_id,
        };
        self_.describe().await?;
        Ok(self_)
    }
}

#[cfg(test)]
impl EthClient<EthMockProvider> {
    pub fn new_mocked(provider: EthMockProvider, peggy_address: EthAddress) -> Self {
        let provider = Arc::new(Provider::new(provider));
        Self {
            peggy: Peggy::new(peggy_address, provider.clone()),
            provider,
            peggy_address,
            expected_chain_id: None,
        }
    }
}

pub(crate) fn from_contract_error<P: JsonRpcClient>(
    e: ContractError<Provider<P>>,
) -> OrchestratorError {
    match e {
        ContractError::MiddlewareError { e } => e.into(),
        ContractError::ProviderError { e } => e.into(),
        ContractError::Revert(data) => {
            OrchestratorError::ProviderError(format!("execution reverted: {}", data))
        }
        other => OrchestratorError::ProviderError(other.to_string()),
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn provider(&self) -> Arc<Provider<P>> {
        self.provider.clone()
    }

    pub fn peggy_address(&self) -> EthAddress {
        self.peggy_address
    }

    pub async fn get_chain_id(&self) -> OrchestratorResult<u64> {
        let chain_id = self.provider.get_chainid().await?;
        Ok(chain_id.as_u64())
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> anyhow::Result<()> {
        let chain_id = self.get_chain_id().await?;
        let block_number = self.get_latest_block_number().await?;
        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(anyhow::anyhow!(
                    "Chain ID mismatch: expected {}, got {}",
                    expected,
                    chain_id
                ));
            }
        }
        tracing::info!(
            "EthClient connected to chain {}, current block: {}, peggy contract: {:?}",
            chain_id,
            block_number,
            self.peggy_address
        );
        Ok(())
    }

    pub async fn get_latest_block_number(&self) -> OrchestratorResult<u64> {
        let number = self.provider.get_block_number().await?;
        Ok(number.as_u64())
    }

    pub async fn get_block_timestamp(&self, block_number: u64) -> OrchestratorResult<u64> {
        let block = self
            .provider
            .get_block(BlockNumber::Number(block_number.into()))
            .await?
            .ok_or_else(|| {
                OrchestratorError::ProviderError(format!("block {} not found", block_number))
            })?;
        Ok(block.timestamp.as_u64())
    }

    /// Average block time over the last `samples` blocks.
    pub async fn estimate_block_time(&self, samples: u64) -> OrchestratorResult<Duration> {
        let latest = self.get_latest_block_number().await?;
        let samples = samples.clamp(1, latest.max(1));
        let oldest = latest.saturating_sub(samples);
        let newest_ts = self.get_block_timestamp(latest).await?;
        let oldest_ts = self.get_block_timestamp(oldest).await?;
        average_block_time(newest_ts, oldest_ts, latest - oldest).ok_or_else(|| {
            OrchestratorError::ProviderError(format!(
                "cannot estimate block time from blocks {}..{}",
                oldest, latest
            ))
        })
    }

    /// Valset nonce the Peggy contract currently trusts.
    pub async fn get_valset_nonce(&self) -> OrchestratorResult<u64> {
        let nonce = self
            .peggy
            .state_last_valset_nonce()
            .call()
            .await
            .map_err(from_contract_error)
            .tap_err(|e| tracing::warn!("Failed to read state_lastValsetNonce: {:?}", e))?;
        u256_to_u64("state_lastValsetNonce", nonce)
    }

    pub async fn get_last_batch_nonce(&self, token: EthAddress) -> OrchestratorResult<u64> {
        let nonce = self
            .peggy
            .state_last_batch_nonces(token)
            .call()
            .await
            .map_err(from_contract_error)?;
        u256_to_u64("state_lastBatchNonces", nonce)
    }

    pub async fn get_last_event_nonce(&self) -> OrchestratorResult<u64> {
        let nonce = self
            .peggy
            .state_last_event_nonce()
            .call()
            .await
            .map_err(from_contract_error)?;
        u256_to_u64("state_lastEventNonce", nonce)
    }

    pub async fn get_peggy_id(&self) -> OrchestratorResult<H256> {
        let id = self
            .peggy
            .state_peggy_id()
            .call()
            .await
            .map_err(from_contract_error)?;
        Ok(H256::from(id))
    }

    pub async fn get_gas_price(&self) -> OrchestratorResult<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    /// Logs matching `filter`, minus removed (reorged) entries. Every returned
    /// log is guaranteed to come from the Peggy contract.
    pub async fn get_logs(&self, filter: &Filter) -> OrchestratorResult<Vec<Log>> {
        let logs = self.provider.get_logs(filter).await?;
        let mut kept = Vec::with_capacity(logs.len());
        for log in logs {
            if log.address != self.peggy_address {
                return Err(OrchestratorError::ProviderError(format!(
                    "provider returned log from {:?}, expected {:?}",
                    log.address, self.peggy_address
                )));
            }
            if log.removed == Some(true) {
                tracing::debug!("Dropping removed log {:?}", log.transaction_hash);
                continue;
            }
            kept.push(log);
        }
        Ok(kept)
    }
}

fn u256_to_u64(what: &str, value: U256) -> OrchestratorResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(OrchestratorError::ProviderError(format!(
            "{} overflows u64: {}",
            what, value
        )));
    }
    Ok(value.as_u64())
}

pub fn average_block_time(newest_ts: u64, oldest_ts: u64, blocks: u64) -> Option<Duration> {
    if blocks == 0 || newest_ts <= oldest_ts {
        return None;
    }
    Some(Duration::from_millis(
        (newest_ts - oldest_ts) * 1000 / blocks,
    ))
}
