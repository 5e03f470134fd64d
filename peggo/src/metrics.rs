// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{extract::State, http::StatusCode, routing::get, Router};
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, HistogramVec,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

const FINE_GRAINED_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.15, 0.2, 0.25, 0.3, 0.35, 0.4, 0.45, 0.5, 0.6, 0.7, 0.8, 0.9,
    1.0, 1.2, 1.4, 1.6, 1.8, 2.0, 2.5, 3.0, 3.5, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10., 15., 20., 25.,
    30., 40., 50., 60.,
];

#[derive(Clone, Debug)]
pub struct OrchestratorMetrics {
    pub(crate) eth_rpc_queries: IntCounterVec,
    pub(crate) eth_rpc_queries_latency: HistogramVec,
    pub(crate) eth_node_connected: IntGauge,

    pub(crate) cosmos_queries: IntCounterVec,
    pub(crate) cosmos_queries_latency: HistogramVec,
    pub(crate) cosmos_broadcasts: IntCounterVec,

    pub(crate) loop_ticks: IntCounterVec,
    pub(crate) loop_failures: IntCounterVec,

    pub(crate) claims_submitted: IntCounterVec,
    pub(crate) confirms_submitted: IntCounterVec,
    pub(crate) valsets_relayed: IntCounter,
    pub(crate) batches_relayed: IntCounter,
    pub(crate) batches_skipped_unprofitable: IntCounter,
    pub(crate) batch_requests_sent: IntCounter,

    pub(crate) last_observed_event_nonce: IntGauge,
    pub(crate) last_scanned_eth_block: IntGauge,
    pub(crate) trusted_valset_nonce: IntGauge,
    pub(crate) valset_anomalies: IntCounter,
}

impl OrchestratorMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            eth_rpc_queries: register_int_counter_vec_with_registry!(
                "peggo_eth_rpc_queries",
                "Total number of queries issued to the Ethereum provider, by method",
                &["method"],
                registry,
            )
            .unwrap(),
            eth_rpc_queries_latency: register_histogram_vec_with_registry!(
                "peggo_eth_rpc_queries_latency",
                "Latency of queries issued to the Ethereum provider, by method",
                &["method"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            eth_node_connected: register_int_gauge_with_registry!(
                "peggo_eth_node_connected",
                "1 if the last Ethereum RPC call succeeded, 0 otherwise",
                registry,
            )
            .unwrap(),
            cosmos_queries: register_int_counter_vec_with_registry!(
                "peggo_cosmos_queries",
                "Total number of queries issued to the Cosmos REST gateway, by route",
                &["route"],
                registry,
            )
            .unwrap(),
            cosmos_queries_latency: register_histogram_vec_with_registry!(
                "peggo_cosmos_queries_latency",
                "Latency of queries issued to the Cosmos REST gateway, by route",
                &["route"],
                FINE_GRAINED_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            cosmos_broadcasts: register_int_counter_vec_with_registry!(
                "peggo_cosmos_broadcasts",
                "Cosmos transaction broadcasts, by outcome",
                &["outcome"],
                registry,
            )
            .unwrap(),
            loop_ticks: register_int_counter_vec_with_registry!(
                "peggo_loop_ticks",
                "Completed ticks per orchestrator loop",
                &["loop"],
                registry,
            )
            .unwrap(),
            loop_failures: register_int_counter_vec_with_registry!(
                "peggo_loop_failures",
                "Failed ticks per orchestrator loop, by error type",
                &["loop", "error_type"],
                registry,
            )
            .unwrap(),
            claims_submitted: register_int_counter_vec_with_registry!(
                "peggo_claims_submitted",
                "Ethereum event claims accepted by the Cosmos chain, by event category",
                &["category"],
                registry,
            )
            .unwrap(),
            confirms_submitted: register_int_counter_vec_with_registry!(
                "peggo_confirms_submitted",
                "Valset and batch confirmations accepted by the Cosmos chain",
                &["kind"],
                registry,
            )
            .unwrap(),
            valsets_relayed: register_int_counter_with_registry!(
                "peggo_valsets_relayed",
                "Valset updates submitted to the Peggy contract",
                registry,
            )
            .unwrap(),
            batches_relayed: register_int_counter_with_registry!(
                "peggo_batches_relayed",
                "Transaction batches submitted to the Peggy contract",
                registry,
            )
            .unwrap(),
            batches_skipped_unprofitable: register_int_counter_with_registry!(
                "peggo_batches_skipped_unprofitable",
                "Batches not relayed because fees did not cover gas",
                registry,
            )
            .unwrap(),
            batch_requests_sent: register_int_counter_with_registry!(
                "peggo_batch_requests_sent",
                "Batch creation requests sent to the Cosmos chain",
                registry,
            )
            .unwrap(),
            last_observed_event_nonce: register_int_gauge_with_registry!(
                "peggo_last_observed_event_nonce",
                "Highest Peggy event nonce this orchestrator has attested to",
                registry,
            )
            .unwrap(),
            last_scanned_eth_block: register_int_gauge_with_registry!(
                "peggo_last_scanned_eth_block",
                "Last Ethereum block scanned by the oracle loop",
                registry,
            )
            .unwrap(),
            trusted_valset_nonce: register_int_gauge_with_registry!(
                "peggo_trusted_valset_nonce",
                "Valset nonce currently trusted by the Peggy contract",
                registry,
            )
            .unwrap(),
            valset_anomalies: register_int_counter_with_registry!(
                "peggo_valset_anomalies",
                "Equal-nonce valsets observed with differing membership",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            String::from_utf8_lossy(&buffer).into_owned(),
        ),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serves `/metrics` for `registry` in the background.
pub fn start_prometheus_server(address: SocketAddr, registry: Registry) {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server on {}: {:?}", address, e);
                return;
            }
        };
        info!("Metrics server listening on {}", address);
        if let Err(e) = axum::serve(listener, metrics_router(registry)).await {
            error!("Metrics server stopped: {:?}", e);
        }
    });
}
