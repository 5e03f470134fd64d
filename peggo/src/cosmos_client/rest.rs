// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{missing_field, CosmosQueryClient};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::OrchestratorMetrics;
use crate::types::{
    BatchConfirm, BatchFees, LastClaimEvent, TransactionBatch, Valset, ValsetConfirm,
};
use async_trait::async_trait;
use ethers::types::Address as EthAddress;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use url::Url;

/// JSON over HTTP against the Cosmos REST gateway, with per-route metrics.
#[derive(Clone, Debug)]
pub struct CosmosHttp {
    client: reqwest::Client,
    base_url: Url,
    metrics: Arc<OrchestratorMetrics>,
}

fn is_transient_transport_error(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_request() {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("connection closed")
        || msg.contains("connection reset")
        || msg.contains("broken pipe")
        || msg.contains("unexpected eof")
}

fn from_reqwest_error(route: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::Timeout(format!("{}: {}", route, err))
    } else if is_transient_transport_error(&err) {
        OrchestratorError::TransientCosmosError(format!("{}: {}", route, err))
    } else {
        OrchestratorError::CosmosError(format!("{}: {}", route, err))
    }
}

impl CosmosHttp {
    pub fn new(
        base_url: &str,
        metrics: Arc<OrchestratorMetrics>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .pool_max_idle_per_host(16)
            .build()?;
        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            metrics,
        })
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> OrchestratorResult<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| OrchestratorError::ConfigError(format!("bad route {}: {:?}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }

    async fn read_response(route: &str, response: reqwest::Response) -> OrchestratorResult<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest_error(route, e))?;
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(OrchestratorError::TransientCosmosError(format!(
                "{} returned {}: {}",
                route, status, body
            )));
        }
        if !status.is_success() {
            return Err(OrchestratorError::CosmosError(format!(
                "{} returned {}: {}",
                route, status, body
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            OrchestratorError::CosmosError(format!("{} returned invalid JSON: {:?}", route, e))
        })
    }

    /// `route` is the metrics label, `path` the concrete path.
    pub async fn get(
        &self,
        route: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> OrchestratorResult<Value> {
        self.metrics.cosmos_queries.with_label_values(&[route]).inc();
        let _guard = self
            .metrics
            .cosmos_queries_latency
            .with_label_values(&[route])
            .start_timer();
        let url = self.url(path, query)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| from_reqwest_error(route, e))?;
        Self::read_response(route, response)
            .await
            .tap_err(|e| tracing::debug!(route, "Cosmos query failed: {:?}", e))
    }

    pub async fn post<B: Serialize + ?Sized>(
        &self,
        route: &str,
        url: Url,
        body: &B,
    ) -> OrchestratorResult<Value> {
        self.metrics.cosmos_queries.with_label_values(&[route]).inc();
        let _guard = self
            .metrics
            .cosmos_queries_latency
            .with_label_values(&[route])
            .start_timer();
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| from_reqwest_error(route, e))?;
        Self::read_response(route, response).await
    }

    pub async fn post_path<B: Serialize + ?Sized>(
        &self,
        route: &str,
        path: &str,
        body: &B,
    ) -> OrchestratorResult<Value> {
        let url = self.url(path, &[])?;
        self.post(route, url, body).await
    }
}

pub(crate) fn field<T: DeserializeOwned>(
    value: &Value,
    route: &str,
    name: &str,
) -> OrchestratorResult<T> {
    let inner = value.get(name).ok_or_else(|| missing_field(route, name))?;
    serde_json::from_value(inner.clone()).map_err(|e| {
        OrchestratorError::CosmosError(format!("{} has malformed `{}`: {:?}", route, name, e))
    })
}

/// Like `field`, but an absent or null value is `None`.
pub(crate) fn optional_field<T: DeserializeOwned>(
    value: &Value,
    route: &str,
    name: &str,
) -> OrchestratorResult<Option<T>> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => field(value, route, name).map(Some),
    }
}

/// Read side of the gravity module.
#[derive(Clone, Debug)]
pub struct CosmosRestClient {
    http: CosmosHttp,
}

impl CosmosRestClient {
    pub fn new(http: CosmosHttp) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &CosmosHttp {
        &self.http
    }
}

#[async_trait]
impl CosmosQueryClient for CosmosRestClient {
    async fn current_valset(&self) -> OrchestratorResult<Valset> {
        const ROUTE: &str = "valset_current";
        let value = self.http.get(ROUTE, "gravity/v1/valset/current", &[]).await?;
        field(&value, ROUTE, "valset")
    }

    async fn valset_at_nonce(&self, nonce: u64) -> OrchestratorResult<Option<Valset>> {
        const ROUTE: &str = "valset";
        let value = self
            .http
            .get(ROUTE, "gravity/v1/valset", &[("nonce", nonce.to_string())])
            .await?;
        let valset: Option<Valset> = optional_field(&value, ROUTE, "valset")?;
        // The gateway answers with an empty set for unknown nonces.
        Ok(valset.filter(|v| !v.is_trivial()))
    }

    async fn latest_valsets(&self) -> OrchestratorResult<Vec<Valset>> {
        const ROUTE: &str = "valset_requests";
        let value = self.http.get(ROUTE, "gravity/v1/valset/requests", &[]).await?;
        Ok(optional_field(&value, ROUTE, "valsets")?.unwrap_or_default())
    }

    async fn valset_confirms(&self, nonce: u64) -> OrchestratorResult<Vec<ValsetConfirm>> {
        const ROUTE: &str = "valset_confirms";
        let value = self
            .http
            .get(
                ROUTE,
                "gravity/v1/valset/confirms",
                &[("nonce", nonce.to_string())],
            )
            .await?;
        Ok(optional_field(&value, ROUTE, "confirms")?.unwrap_or_default())
    }

    async fn oldest_unsigned_valsets(
        &self,
        orchestrator: &str,
    ) -> OrchestratorResult<Vec<Valset>> {
        const ROUTE: &str = "valset_last";
        let value = self
            .http
            .get(
                ROUTE,
                "gravity/v1/valset/last",
                &[("address", orchestrator.to_string())],
            )
            .await?;
        Ok(optional_field(&value, ROUTE, "valsets")?.unwrap_or_default())
    }

    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> OrchestratorResult<Option<TransactionBatch>> {
        const ROUTE: &str = "batch_last";
        let value = self
            .http
            .get(
                ROUTE,
                "gravity/v1/batch/last",
                &[("address", orchestrator.to_string())],
            )
            .await?;
        optional_field(&value, ROUTE, "batch")
    }

    async fn latest_batches(&self) -> OrchestratorResult<Vec<TransactionBatch>> {
        const ROUTE: &str = "batch_outgoingtx";
        let value = self.http.get(ROUTE, "gravity/v1/batch/outgoingtx", &[]).await?;
        Ok(optional_field(&value, ROUTE, "batches")?.unwrap_or_default())
    }

    async fn batch_confirms(
        &self,
        nonce: u64,
        token_contract: EthAddress,
    ) -> OrchestratorResult<Vec<BatchConfirm>> {
        const ROUTE: &str = "batch_confirms";
        let value = self
            .http
            .get(
                ROUTE,
                "gravity/v1/batch/confirms",
                &[
                    ("nonce", nonce.to_string()),
                    ("contract_address", format!("{:?}", token_contract)),
                ],
            )
            .await?;
        Ok(optional_field(&value, ROUTE, "confirms")?.unwrap_or_default())
    }

    async fn last_claim_event(&self, orchestrator: &str) -> OrchestratorResult<LastClaimEvent> {
        const ROUTE: &str = "oracle_eventnonce";
        let path = format!("gravity/v1/oracle/eventnonce/{}", orchestrator);
        let value = self.http.get(ROUTE, &path, &[]).await?;
        Ok(optional_field(&value, ROUTE, "last_claim_event")?.unwrap_or_default())
    }

    async fn batch_fees(&self) -> OrchestratorResult<Vec<BatchFees>> {
        const ROUTE: &str = "batchfees";
        let value = self.http.get(ROUTE, "gravity/v1/batchfees", &[]).await?;
        Ok(optional_field(&value, ROUTE, "batch_fees")?.unwrap_or_default())
    }
}
