// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Confirms pending valsets and batches with the orchestrator's Ethereum key.

use crate::checkpoint::{batch_checkpoint, encode_signature, sign_checkpoint, valset_checkpoint};
use crate::cosmos_client::{broadcast_with_retry, CosmosBroadcastClient, CosmosQueryClient, PeggyMsg};
use crate::error::OrchestratorResult;
use crate::loops::LoopTask;
use crate::metrics::OrchestratorMetrics;
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct PeggySigner {
    wallet: LocalWallet,
    peggy_id: H256,
    cosmos: Arc<dyn CosmosQueryClient>,
    broadcaster: Arc<dyn CosmosBroadcastClient>,
    broadcast_retry: Duration,
    metrics: Arc<OrchestratorMetrics>,
}

impl PeggySigner {
    pub fn new(
        wallet: LocalWallet,
        peggy_id: H256,
        cosmos: Arc<dyn CosmosQueryClient>,
        broadcaster: Arc<dyn CosmosBroadcastClient>,
        broadcast_retry: Duration,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            wallet,
            peggy_id,
            cosmos,
            broadcaster,
            broadcast_retry,
            metrics,
        }
    }

    async fn send_confirm(&self, kind: &str, msg: PeggyMsg) -> OrchestratorResult<()> {
        broadcast_with_retry(self.broadcaster.as_ref(), vec![msg], self.broadcast_retry).await?;
        self.metrics
            .confirms_submitted
            .with_label_values(&[kind])
            .inc();
        Ok(())
    }

    pub async fn sign_valsets(&self) -> OrchestratorResult<()> {
        let orchestrator = self.broadcaster.orchestrator_address();
        let mut valsets = self.cosmos.oldest_unsigned_valsets(orchestrator).await?;
        valsets.sort_by_key(|v| v.nonce);
        for valset in valsets {
            let checkpoint = valset_checkpoint(self.peggy_id, &valset);
            let signature = sign_checkpoint(&self.wallet, checkpoint)?;
            info!(nonce = valset.nonce, "Confirming valset");
            self.send_confirm(
                "valset",
                PeggyMsg::ValsetConfirm {
                    nonce: valset.nonce,
                    orchestrator: orchestrator.to_string(),
                    eth_address: self.wallet.address(),
                    signature: encode_signature(&signature),
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn sign_batch(&self) -> OrchestratorResult<()> {
        let orchestrator = self.broadcaster.orchestrator_address();
        let Some(batch) = self.cosmos.oldest_unsigned_batch(orchestrator).await? else {
            debug!("No unsigned batch");
            return Ok(());
        };
        let checkpoint = batch_checkpoint(self.peggy_id, &batch);
        let signature = sign_checkpoint(&self.wallet, checkpoint)?;
        info!(
            nonce = batch.batch_nonce,
            "Confirming batch for {:?}", batch.token_contract
        );
        self.send_confirm(
            "batch",
            PeggyMsg::ConfirmBatch {
                nonce: batch.batch_nonce,
                token_contract: batch.token_contract,
                eth_signer: self.wallet.address(),
                orchestrator: orchestrator.to_string(),
                signature: encode_signature(&signature),
            },
        )
        .await
    }
}

#[async_trait]
impl LoopTask for PeggySigner {
    fn name(&self) -> &'static str {
        "signer"
    }

    async fn tick(&self) -> OrchestratorResult<()> {
        self.sign_valsets().await?;
        self.sign_batch().await
    }
}
