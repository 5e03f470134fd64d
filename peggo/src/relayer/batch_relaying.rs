// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{collect_signatures, is_profitable, PeggyRelayer};
use crate::checkpoint::batch_checkpoint;
use crate::error::OrchestratorResult;
use crate::types::{TransactionBatch, Valset};
use ethers::providers::JsonRpcClient;
use ethers::types::Address as EthAddress;
use std::collections::BTreeMap;
use tracing::{debug, error, info};

impl<P> PeggyRelayer<P>
where
    P: JsonRpcClient + 'static,
{
    /// For each token, relays the highest-nonce batch that is still pending on
    /// the contract, not timed out, confirmed by enough of `current` and
    /// worth the gas. A failing token does not hold back the others.
    pub(crate) async fn relay_batches(&self, current: &Valset) -> OrchestratorResult<()> {
        let batches = self.cosmos.latest_batches().await?;
        if batches.is_empty() {
            return Ok(());
        }
        let eth_height = self.eth().get_latest_block_number().await?;

        let mut by_token: BTreeMap<EthAddress, Vec<TransactionBatch>> = BTreeMap::new();
        for batch in batches {
            by_token.entry(batch.token_contract).or_default().push(batch);
        }

        let mut last_error = None;
        for (token, batches) in by_token {
            if let Err(e) = self.relay_token_batches(current, token, batches, eth_height).await {
                error!("Failed to relay batches for token {:?}: {:?}", token, e);
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn relay_token_batches(
        &self,
        current: &Valset,
        token: EthAddress,
        mut batches: Vec<TransactionBatch>,
        eth_height: u64,
    ) -> OrchestratorResult<()> {
        let last_nonce = self.eth().get_last_batch_nonce(token).await?;
        let total_power = current.members.total_power();
        batches.sort_by(|a, b| b.batch_nonce.cmp(&a.batch_nonce));

        for batch in batches {
            if batch.batch_nonce <= last_nonce {
                break;
            }
            if batch.is_timed_out(eth_height) {
                debug!(
                    "Batch {} for {:?} timed out at {} (height {})",
                    batch.batch_nonce, token, batch.batch_timeout, eth_height
                );
                continue;
            }
            let confirms = self.cosmos.batch_confirms(batch.batch_nonce, token).await?;
            let checkpoint = batch_checkpoint(self.peggy_id, &batch);
            let signatures = collect_signatures(current, checkpoint, &confirms);
            if !self
                .config
                .threshold
                .is_met(signatures.confirmed_power, total_power)
            {
                debug!(
                    "Batch {} for {:?} has {} of {} power confirmed",
                    batch.batch_nonce, token, signatures.confirmed_power, total_power
                );
                continue;
            }

            if self.config.profit_multiplier > 0.0 {
                let gas_cost = self
                    .submitter
                    .estimate_submit_batch_cost(current, &batch, &signatures)
                    .await?;
                let fees = batch.fee_total();
                if !is_profitable(fees, gas_cost, self.config.profit_multiplier) {
                    info!(
                        "Skipping batch {} for {:?}: fees {} below gas cost {} x {}",
                        batch.batch_nonce, token, fees, gas_cost, self.config.profit_multiplier
                    );
                    self.metrics.batches_skipped_unprofitable.inc();
                    return Ok(());
                }
            }

            info!(
                "Relaying batch {} for {:?} with {} transactions",
                batch.batch_nonce,
                token,
                batch.transactions.len()
            );
            let submitted = self
                .submit_with_retry(
                    "submitBatch",
                    batch.batch_nonce,
                    || self.submitter.submit_batch(current, &batch, &signatures),
                    || self.eth().get_last_batch_nonce(token),
                )
                .await?;
            if submitted.is_some() {
                self.metrics.batches_relayed.inc();
            }
            return Ok(());
        }
        Ok(())
    }
}
