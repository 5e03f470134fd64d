// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::cosmos_client::broadcaster::{CosmosBroadcaster, RemoteTxSigner};
use crate::cosmos_client::rest::{CosmosHttp, CosmosRestClient};
use crate::cosmos_client::{CosmosBroadcastClient, CosmosQueryClient};
use crate::eth_client::EthClient;
use crate::eth_transaction_builder::{EthPeggySubmitter, PeggySubmitter};
use crate::metered_eth_provider::MeteredEthHttpProvider;
use crate::metrics::OrchestratorMetrics;
use crate::oracle::OracleConfig;
use crate::relayer::RelayerConfig;
use crate::scanner::{EventScanner, ScanConfig};
use crate::types::PowerThreshold;
use crate::utils::{read_eth_key, wallet_with_chain_id};
use anyhow::anyhow;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address as EthAddress, U256};
use peggo_config::Config;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    // Port to serve prometheus metrics on
    pub metrics_port: u16,
    pub eth: EthConfig,
    pub cosmos: CosmosConfig,
    #[serde(default)]
    pub relayer: RelayerSettings,
    #[serde(default)]
    pub loops: LoopSettings,
    #[serde(default)]
    pub requester: RequesterSettings,
}

impl Config for OrchestratorConfig {}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EthConfig {
    // Rpc url for Eth fullnode, used for query stuff and submitting transactions.
    pub eth_rpc_url: String,
    // Address of the Peggy contract
    pub peggy_contract_address: String,
    // File holding the hex encoded orchestrator eth key
    pub eth_private_key_path: PathBuf,
    // When set, refuse to start against any other chain
    pub expected_chain_id: Option<u64>,
    #[serde(default = "default_block_confirmations")]
    pub block_confirmations: u64,
    // Largest span of a single eth_getLogs call
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    // Lowest block that may hold Peggy events
    #[serde(default)]
    pub peggy_deployment_block: u64,
    #[serde(default = "default_oracle_max_scan_blocks")]
    pub oracle_max_scan_blocks: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_retry_secs")]
    pub max_retry_duration_secs: u64,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CosmosConfig {
    // REST gateway of the source chain node
    pub rest_url: String,
    pub chain_id: String,
    // Bech32 address of this orchestrator
    pub orchestrator_address: String,
    // Remote signer that turns messages into signed tx bytes
    pub signer_url: String,
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_retry_secs")]
    pub broadcast_retry_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RelayerSettings {
    pub relay_valsets: bool,
    pub relay_batches: bool,
    // Relay a batch only when fees >= gas cost * multiplier. 0 disables the check.
    pub profit_multiplier: f64,
    pub consensus_threshold: f64,
    pub max_submit_attempts: u32,
}

impl Default for RelayerSettings {
    fn default() -> Self {
        Self {
            relay_valsets: true,
            relay_batches: true,
            profit_multiplier: 1.0,
            consensus_threshold: 0.66,
            max_submit_attempts: 3,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoopSettings {
    pub oracle_loop_multiplier: f64,
    pub signer_loop_multiplier: f64,
    pub relayer_loop_multiplier: f64,
    pub requester_loop_multiplier: f64,
    // Used when block time cannot be estimated at start
    pub default_block_time_secs: u64,
    pub block_time_samples: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            oracle_loop_multiplier: 1.0,
            signer_loop_multiplier: 1.0,
            relayer_loop_multiplier: 1.0,
            requester_loop_multiplier: 1.0,
            default_block_time_secs: 12,
            block_time_samples: 10,
        }
    }
}

impl LoopSettings {
    pub fn default_block_time(&self) -> Duration {
        Duration::from_secs(self.default_block_time_secs)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequesterSettings {
    pub enabled: bool,
    // Decimal token units, may exceed u64
    pub min_batch_fee: String,
}

impl Default for RequesterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_batch_fee: "0".to_string(),
        }
    }
}

fn default_block_confirmations() -> u64 {
    12
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_oracle_max_scan_blocks() -> u64 {
    5000
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_retry_secs() -> u64 {
    60
}

fn default_account_prefix() -> String {
    "umee".to_string()
}

/// Everything the loops need, built from a checked config.
pub struct OrchestratorComponents {
    pub eth_client: Arc<EthClient<MeteredEthHttpProvider>>,
    pub scanner: Arc<EventScanner<MeteredEthHttpProvider>>,
    pub cosmos: Arc<dyn CosmosQueryClient>,
    pub broadcaster: Arc<dyn CosmosBroadcastClient>,
    pub submitter: Arc<dyn PeggySubmitter>,
    pub wallet: LocalWallet,
    pub oracle: OracleConfig,
    pub relayer: RelayerConfig,
    pub min_batch_fee: U256,
    pub broadcast_retry: Duration,
}

impl OrchestratorConfig {
    pub fn peggy_address(&self) -> anyhow::Result<EthAddress> {
        EthAddress::from_str(&self.eth.peggy_contract_address)
            .map_err(|e| anyhow!("Invalid peggy-contract-address: {:?}", e))
    }

    pub fn threshold(&self) -> anyhow::Result<PowerThreshold> {
        Ok(PowerThreshold::from_fraction(
            self.relayer.consensus_threshold,
        )?)
    }

    pub fn min_batch_fee(&self) -> anyhow::Result<U256> {
        U256::from_dec_str(self.requester.min_batch_fee.trim())
            .map_err(|e| anyhow!("Invalid min-batch-fee {:?}: {:?}", self.requester.min_batch_fee, e))
    }

    /// Checks that need no network access.
    pub fn check(&self) -> anyhow::Result<()> {
        self.peggy_address()?;
        self.threshold()?;
        self.min_batch_fee()?;
        for (name, url) in [
            ("eth-rpc-url", &self.eth.eth_rpc_url),
            ("rest-url", &self.cosmos.rest_url),
            ("signer-url", &self.cosmos.signer_url),
        ] {
            url::Url::parse(url).map_err(|e| anyhow!("Invalid {} {:?}: {:?}", name, url, e))?;
        }
        let loops = &self.loops;
        for (name, value) in [
            ("oracle-loop-multiplier", loops.oracle_loop_multiplier),
            ("signer-loop-multiplier", loops.signer_loop_multiplier),
            ("relayer-loop-multiplier", loops.relayer_loop_multiplier),
            ("requester-loop-multiplier", loops.requester_loop_multiplier),
        ] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(anyhow!("{} must be positive, got {}", name, value));
            }
        }
        if !(self.relayer.profit_multiplier >= 0.0 && self.relayer.profit_multiplier.is_finite()) {
            return Err(anyhow!(
                "profit-multiplier must not be negative, got {}",
                self.relayer.profit_multiplier
            ));
        }
        if loops.default_block_time_secs == 0 {
            return Err(anyhow!("default-block-time-secs must be positive"));
        }
        if self.eth.max_block_range == 0 || self.eth.oracle_max_scan_blocks == 0 {
            return Err(anyhow!(
                "max-block-range and oracle-max-scan-blocks must be positive"
            ));
        }
        if self.relayer.max_submit_attempts == 0 {
            return Err(anyhow!("max-submit-attempts must be at least 1"));
        }
        if self.cosmos.orchestrator_address.is_empty() || self.cosmos.chain_id.is_empty() {
            return Err(anyhow!("orchestrator-address and chain-id are required"));
        }
        Ok(())
    }

    pub async fn validate(
        &self,
        metrics: Arc<OrchestratorMetrics>,
    ) -> anyhow::Result<OrchestratorComponents> {
        info!("Starting config validation");
        self.check()?;
        let peggy_address = self.peggy_address()?;

        let wallet = read_eth_key(&self.eth.eth_private_key_path)?;
        info!("Orchestrator eth address: {:?}", wallet.address());

        info!("Creating Ethereum client");
        let eth_client = Arc::new(
            EthClient::new(
                &self.eth.eth_rpc_url,
                peggy_address,
                metrics.clone(),
                self.eth.expected_chain_id,
                Duration::from_secs(self.eth.rpc_timeout_secs),
            )
            .await?,
        );
        let chain_id = eth_client.get_chain_id().await?;
        let wallet = wallet_with_chain_id(wallet, chain_id);
        let scanner = Arc::new(EventScanner::new(
            eth_client.clone(),
            ScanConfig {
                max_block_range: self.eth.max_block_range,
                max_retry_duration: Duration::from_secs(self.eth.max_retry_duration_secs),
            },
        ));
        let submitter: Arc<dyn PeggySubmitter> = Arc::new(EthPeggySubmitter::new(
            eth_client.provider(),
            wallet.clone(),
            peggy_address,
        ));

        info!("Creating Cosmos clients for {}", self.cosmos.rest_url);
        let cosmos_timeout = Duration::from_secs(self.cosmos.rpc_timeout_secs);
        let cosmos: Arc<dyn CosmosQueryClient> = Arc::new(CosmosRestClient::new(CosmosHttp::new(
            &self.cosmos.rest_url,
            metrics.clone(),
            cosmos_timeout,
        )?));
        let tx_signer = RemoteTxSigner::new(CosmosHttp::new(
            &self.cosmos.signer_url,
            metrics.clone(),
            cosmos_timeout,
        )?);
        let broadcaster: Arc<dyn CosmosBroadcastClient> = Arc::new(CosmosBroadcaster::new(
            CosmosHttp::new(&self.cosmos.rest_url, metrics.clone(), cosmos_timeout)?,
            tx_signer,
            self.cosmos.chain_id.clone(),
            self.cosmos.orchestrator_address.clone(),
            metrics,
        ));

        let broadcast_retry = Duration::from_secs(self.cosmos.broadcast_retry_secs);
        let components = OrchestratorComponents {
            eth_client,
            scanner,
            cosmos,
            broadcaster,
            submitter,
            wallet,
            oracle: OracleConfig {
                block_confirmations: self.eth.block_confirmations,
                max_scan_blocks: self.eth.oracle_max_scan_blocks,
                peggy_deployment_block: self.eth.peggy_deployment_block,
                account_prefix: self.cosmos.account_prefix.clone(),
                broadcast_retry,
            },
            relayer: RelayerConfig {
                relay_valsets: self.relayer.relay_valsets,
                relay_batches: self.relayer.relay_batches,
                threshold: self.threshold()?,
                profit_multiplier: self.relayer.profit_multiplier,
                max_submit_attempts: self.relayer.max_submit_attempts,
                peggy_deployment_block: self.eth.peggy_deployment_block,
            },
            min_batch_fee: self.min_batch_fee()?,
            broadcast_retry,
        };
        info!("Config validation complete");
        Ok(components)
    }
}
