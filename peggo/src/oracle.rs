// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Attests Peggy contract events to the source chain as claims.

use crate::cosmos_client::{
    broadcast_with_retry, BroadcastOutcome, CosmosBroadcastClient, CosmosQueryClient, PeggyMsg,
};
use crate::error::OrchestratorResult;
use crate::events::{EventCategory, PeggyEvent};
use crate::loops::LoopTask;
use crate::metrics::OrchestratorMetrics;
use crate::scanner::EventScanner;
use crate::utils::to_bech32;
use async_trait::async_trait;
use ethers::providers::JsonRpcClient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct OracleConfig {
    /// Blocks a log must be buried under before it is attested.
    pub block_confirmations: u64,
    /// Upper bound on blocks scanned per tick.
    pub max_scan_blocks: u64,
    /// First block that can hold Peggy events.
    pub peggy_deployment_block: u64,
    /// Bech32 prefix of deposit receivers.
    pub account_prefix: String,
    pub broadcast_retry: Duration,
}

/// Claim for one event. Deposit receivers are the low 20 bytes of the
/// `bytes32` destination.
pub fn event_to_claim(
    event: &PeggyEvent,
    orchestrator: &str,
    account_prefix: &str,
) -> OrchestratorResult<PeggyMsg> {
    let orchestrator = orchestrator.to_string();
    let msg = match event {
        PeggyEvent::SendToCosmos(e) => PeggyMsg::SendToCosmosClaim {
            event_nonce: e.meta.event_nonce,
            block_height: e.meta.block_number,
            token_contract: e.token_contract,
            amount: e.amount,
            ethereum_sender: e.sender,
            cosmos_receiver: to_bech32(account_prefix, &e.destination[12..])?,
            orchestrator,
        },
        PeggyEvent::TransactionBatchExecuted(e) => PeggyMsg::BatchSendToEthClaim {
            event_nonce: e.meta.event_nonce,
            block_height: e.meta.block_number,
            batch_nonce: e.batch_nonce,
            token_contract: e.token_contract,
            orchestrator,
        },
        PeggyEvent::Erc20Deployed(e) => PeggyMsg::Erc20DeployedClaim {
            event_nonce: e.meta.event_nonce,
            block_height: e.meta.block_number,
            cosmos_denom: e.cosmos_denom.clone(),
            token_contract: e.token_contract,
            name: e.name.clone(),
            symbol: e.symbol.clone(),
            decimals: e.decimals as u64,
            orchestrator,
        },
        PeggyEvent::ValsetUpdated(e) => PeggyMsg::ValsetUpdatedClaim {
            event_nonce: e.meta.event_nonce,
            valset_nonce: e.new_valset_nonce,
            block_height: e.meta.block_number,
            members: e.members(),
            reward_amount: e.reward_amount,
            reward_token: e.reward_token,
            orchestrator,
        },
    };
    Ok(msg)
}

/// Events newer than `last_event_nonce`, in ascending event nonce order.
/// The contract numbers all categories with one counter, so this is also
/// the order the source chain accepts claims in.
pub fn pending_claim_events(mut events: Vec<PeggyEvent>, last_event_nonce: u64) -> Vec<PeggyEvent> {
    events.retain(|e| e.event_nonce() > last_event_nonce);
    events.sort_by_key(|e| e.event_nonce());
    events.dedup_by_key(|e| e.event_nonce());
    events
}

pub struct EthOracle<P> {
    scanner: Arc<EventScanner<P>>,
    cosmos: Arc<dyn CosmosQueryClient>,
    broadcaster: Arc<dyn CosmosBroadcastClient>,
    config: OracleConfig,
    metrics: Arc<OrchestratorMetrics>,
    /// Last block whose events are all attested. Zero until the first
    /// fully successful tick.
    last_checked_block: AtomicU64,
}

impl<P> EthOracle<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        scanner: Arc<EventScanner<P>>,
        cosmos: Arc<dyn CosmosQueryClient>,
        broadcaster: Arc<dyn CosmosBroadcastClient>,
        config: OracleConfig,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            scanner,
            cosmos,
            broadcaster,
            config,
            metrics,
            last_checked_block: AtomicU64::new(0),
        }
    }

    pub fn last_checked_block(&self) -> u64 {
        self.last_checked_block.load(Ordering::SeqCst)
    }

    /// Block range to scan this tick, or `None` when nothing is final yet.
    pub fn scan_range(&self, last_claim_height: u64, latest_block: u64) -> Option<(u64, u64)> {
        let safe_tip = latest_block.saturating_sub(self.config.block_confirmations);
        let resume = match self.last_checked_block() {
            0 => 0,
            checked => checked.saturating_add(1),
        };
        let from = last_claim_height
            .max(self.config.peggy_deployment_block)
            .max(resume);
        if from > safe_tip {
            return None;
        }
        let span = self.config.max_scan_blocks.max(1);
        Some((from, safe_tip.min(from.saturating_add(span - 1))))
    }

    pub async fn relay_events(&self) -> OrchestratorResult<()> {
        let orchestrator = self.broadcaster.orchestrator_address();
        let last_claim = self.cosmos.last_claim_event(orchestrator).await?;
        self.metrics
            .last_observed_event_nonce
            .set(last_claim.ethereum_event_nonce as i64);

        let latest_block = self.scanner.client().get_latest_block_number().await?;
        let Some((from, to)) = self.scan_range(last_claim.ethereum_event_height, latest_block) else {
            debug!(
                "No final blocks past {} (head {})",
                last_claim.ethereum_event_height, latest_block
            );
            return Ok(());
        };

        let events = self.scanner.scan(&EventCategory::ALL, from, to).await?;
        let pending = pending_claim_events(events, last_claim.ethereum_event_nonce);
        self.metrics.last_scanned_eth_block.set(to as i64);
        if pending.is_empty() {
            debug!("No new Peggy events in blocks [{}, {}]", from, to);
            self.last_checked_block.store(to, Ordering::SeqCst);
            return Ok(());
        }

        // One claim per tx, in nonce order. The first rejection ends the tick
        // and the next tick resumes from the last attested nonce.
        for event in &pending {
            let claim = event_to_claim(event, orchestrator, &self.config.account_prefix)?;
            let outcome =
                broadcast_with_retry(self.broadcaster.as_ref(), vec![claim], self.config.broadcast_retry)
                    .await?;
            if let BroadcastOutcome::AlreadyAccepted { reason } = &outcome {
                debug!(nonce = event.event_nonce(), "Claim already accepted: {}", reason);
            }
            self.metrics
                .claims_submitted
                .with_label_values(&[event.category().as_str()])
                .inc();
            self.metrics
                .last_observed_event_nonce
                .set(event.event_nonce() as i64);
        }
        info!(
            claims = pending.len(),
            first_nonce = pending.first().map(|e| e.event_nonce()),
            last_nonce = pending.last().map(|e| e.event_nonce()),
            "Oracle sent set of claims successfully"
        );
        self.last_checked_block.store(to, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl<P> LoopTask for EthOracle<P>
where
    P: JsonRpcClient + 'static,
{
    fn name(&self) -> &'static str {
        "oracle"
    }

    async fn tick(&self) -> OrchestratorResult<()> {
        self.relay_events().await
    }
}
