// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::valset_updated_topic;
use crate::error::OrchestratorResult;
use crate::eth_client::EthClient;
use crate::events::{EventCategory, PeggyEvent};
use crate::retry_with_max_elapsed_time;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, Filter, ValueOrArray, H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Largest block span a single eth_getLogs call may cover.
    pub max_block_range: u64,
    /// How long one chunk is retried before the scan fails.
    pub max_retry_duration: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_block_range: 2000,
            max_retry_duration: Duration::from_secs(60),
        }
    }
}

/// Splits `[from, to]` into consecutive closed windows of at most `size` blocks.
pub fn chunk_ranges(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut ranges = vec![];
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

pub fn nonce_topic(nonce: u64) -> H256 {
    let mut bytes = [0u8; 32];
    U256::from(nonce).to_big_endian(&mut bytes);
    H256::from(bytes)
}

pub fn peggy_event_filter(
    peggy: EthAddress,
    categories: &[EventCategory],
    from: u64,
    to: u64,
) -> Filter {
    Filter::new()
        .address(peggy)
        .topic0(ValueOrArray::Array(
            categories.iter().map(|c| c.topic()).collect::<Vec<_>>(),
        ))
        .from_block(from)
        .to_block(to)
}

/// ValsetUpdatedEvent logs whose indexed nonce is `valset_nonce`.
pub fn valset_updated_filter(peggy: EthAddress, valset_nonce: u64, from: u64, to: u64) -> Filter {
    Filter::new()
        .address(peggy)
        .topic0(valset_updated_topic())
        .topic1(nonce_topic(valset_nonce))
        .from_block(from)
        .to_block(to)
}

pub struct EventScanner<P> {
    client: Arc<EthClient<P>>,
    config: ScanConfig,
}

impl<P> EventScanner<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(client: Arc<EthClient<P>>, config: ScanConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<EthClient<P>> {
        &self.client
    }

    /// Raw logs for `filter`, retrying transient failures for the configured duration.
    pub async fn fetch_logs(&self, filter: &Filter) -> OrchestratorResult<Vec<ethers::types::Log>> {
        match retry_with_max_elapsed_time!(
            self.client.get_logs(filter),
            self.config.max_retry_duration
        ) {
            Ok(Ok(logs)) => Ok(logs),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }

    /// Decoded events of `categories` in `[from, to]`, ordered by
    /// (block number, log index). A decode failure aborts the whole scan.
    pub async fn scan(
        &self,
        categories: &[EventCategory],
        from: u64,
        to: u64,
    ) -> OrchestratorResult<Vec<PeggyEvent>> {
        let mut events = vec![];
        if from > to || categories.is_empty() {
            return Ok(events);
        }
        let peggy = self.client.peggy_address();
        for (start, end) in chunk_ranges(from, to, self.config.max_block_range) {
            let filter = peggy_event_filter(peggy, categories, start, end);
            let logs = self.fetch_logs(&filter).await?;
            debug!("Fetched {} Peggy logs in blocks [{}, {}]", logs.len(), start, end);
            for log in logs {
                if let Some(event) = PeggyEvent::try_from_log(&log)? {
                    if categories.contains(&event.category()) {
                        events.push(event);
                    }
                }
            }
        }
        events.sort_by_key(|e| (e.meta().block_number, e.meta().log_index));
        Ok(events)
    }
}
