// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::cosmos_client::{broadcast_with_retry, CosmosBroadcastClient, CosmosQueryClient, PeggyMsg};
use crate::error::OrchestratorResult;
use crate::loops::LoopTask;
use crate::metrics::OrchestratorMetrics;
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source chain denom of a bridged ERC20.
pub fn peggy_denom(token: EthAddress) -> String {
    format!("peggy{}", ethers::utils::to_checksum(&token, None))
}

/// Asks the source chain to cut a batch for every token whose unbatched fees
/// exceed `min_batch_fee`.
pub struct BatchRequester {
    cosmos: Arc<dyn CosmosQueryClient>,
    broadcaster: Arc<dyn CosmosBroadcastClient>,
    min_batch_fee: U256,
    broadcast_retry: Duration,
    metrics: Arc<OrchestratorMetrics>,
}

impl BatchRequester {
    pub fn new(
        cosmos: Arc<dyn CosmosQueryClient>,
        broadcaster: Arc<dyn CosmosBroadcastClient>,
        min_batch_fee: U256,
        broadcast_retry: Duration,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            cosmos,
            broadcaster,
            min_batch_fee,
            broadcast_retry,
            metrics,
        }
    }

    pub async fn request_batches(&self) -> OrchestratorResult<()> {
        let orchestrator = self.broadcaster.orchestrator_address();
        for fees in self.cosmos.batch_fees().await? {
            if fees.tx_count == 0 || fees.total_fees <= self.min_batch_fee {
                debug!(
                    "Not requesting batch for {:?}: {} txs, fees {}",
                    fees.token, fees.tx_count, fees.total_fees
                );
                continue;
            }
            let denom = peggy_denom(fees.token);
            info!(
                "Requesting batch for {} ({} txs, fees {})",
                denom, fees.tx_count, fees.total_fees
            );
            broadcast_with_retry(
                self.broadcaster.as_ref(),
                vec![PeggyMsg::RequestBatch {
                    orchestrator: orchestrator.to_string(),
                    denom,
                }],
                self.broadcast_retry,
            )
            .await?;
            self.metrics.batch_requests_sent.inc();
        }
        Ok(())
    }
}

#[async_trait]
impl LoopTask for BatchRequester {
    fn name(&self) -> &'static str {
        "requester"
    }

    async fn tick(&self) -> OrchestratorResult<()> {
        self.request_batches().await
    }
}
