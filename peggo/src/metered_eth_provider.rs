// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::OrchestratorMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Upper bound on in-flight requests shared by all loops.
const MAX_CONCURRENT_REQUESTS: usize = 8;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    metrics: Arc<OrchestratorMetrics>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

fn is_rate_limit_error(e: &HttpClientError) -> bool {
    // Some providers answer with non-standard bodies such as
    // {"code":-32005,"message":"Too Many Requests"}, so match on the rendered error.
    let error_str = format!("{:?}", e).to_lowercase();
    error_str.contains("rate limit")
        || error_str.contains("429")
        || error_str.contains("too many requests")
        || error_str.contains("-32005")
}

#[async_trait::async_trait]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is never closed, so acquire only fails on a logic error.
        let _permit = self.semaphore.acquire().await.ok();

        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();

        let mut result = self.inner.request(method, &params).await;
        let mut retry_count = 0;
        while retry_count < MAX_RATE_LIMIT_RETRIES {
            match &result {
                Err(e) if is_rate_limit_error(e) => {}
                _ => break,
            }
            // 1s, 2s, 4s
            let backoff_duration = Duration::from_secs(1 << retry_count);
            tracing::warn!(
                method,
                "Rate limited by Ethereum provider, retrying after {:?} (attempt {}/{})",
                backoff_duration,
                retry_count + 1,
                MAX_RATE_LIMIT_RETRIES
            );
            tokio::time::sleep(backoff_duration).await;
            result = self.inner.request(method, &params).await;
            retry_count += 1;
        }

        match &result {
            Ok(_) => self.metrics.eth_node_connected.set(1),
            Err(_) => self.metrics.eth_node_connected.set(0),
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(
        url: Url,
        metrics: Arc<OrchestratorMetrics>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;
        Ok(Self {
            inner: Http::new_with_client(url, client),
            metrics,
            semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_REQUESTS)),
        })
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    metrics: Arc<OrchestratorMetrics>,
    timeout: Duration,
) -> anyhow::Result<Provider<MeteredEthHttpProvider>> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, metrics, timeout)?;
    Ok(Provider::new(http_provider))
}
