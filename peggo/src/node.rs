// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::config::{LoopSettings, OrchestratorComponents, OrchestratorConfig};
use crate::eth_client::EthClient;
use crate::loops::spawn_loop;
use crate::metrics::OrchestratorMetrics;
use crate::oracle::EthOracle;
use crate::relayer::PeggyRelayer;
use crate::requester::BatchRequester;
use crate::signer::PeggySigner;
use ethers::providers::JsonRpcClient;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handles of a running orchestrator. Cancelling `cancel` stops every loop.
pub struct OrchestratorHandle {
    pub cancel: CancellationToken,
    pub handles: Vec<JoinHandle<()>>,
}

impl OrchestratorHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Loop task ended abnormally: {:?}", e);
            }
        }
        info!("All loops stopped");
    }
}

pub async fn run_orchestrator(
    config: OrchestratorConfig,
    prometheus_registry: &prometheus::Registry,
) -> anyhow::Result<OrchestratorHandle> {
    let metrics = Arc::new(OrchestratorMetrics::new(prometheus_registry));
    let components = config.validate(metrics.clone()).await?;
    let peggy_id = components
        .eth_client
        .get_peggy_id()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read peggy id: {:?}", e))?;
    info!("Peggy id: {:?}", peggy_id);

    let block_time = block_time_or_default(&components.eth_client, &config.loops).await;
    Ok(start_loops(
        components,
        peggy_id,
        &config,
        block_time,
        metrics,
    ))
}

/// Average block time, or the configured default when it cannot be measured.
pub async fn block_time_or_default<P: JsonRpcClient + 'static>(
    eth: &EthClient<P>,
    loops: &LoopSettings,
) -> Duration {
    match eth.estimate_block_time(loops.block_time_samples).await {
        Ok(block_time) if !block_time.is_zero() => {
            info!("Estimated eth block time: {:?}", block_time);
            block_time
        }
        other => {
            let fallback = loops.default_block_time();
            warn!(
                "Using default block time {:?}, estimation gave {:?}",
                fallback, other
            );
            fallback
        }
    }
}

pub fn loop_period(block_time: Duration, multiplier: f64) -> Duration {
    block_time.mul_f64(multiplier).max(Duration::from_millis(100))
}

fn start_loops(
    components: OrchestratorComponents,
    peggy_id: ethers::types::H256,
    config: &OrchestratorConfig,
    block_time: Duration,
    metrics: Arc<OrchestratorMetrics>,
) -> OrchestratorHandle {
    let cancel = CancellationToken::new();
    let loops = &config.loops;
    let mut handles = vec![];

    let oracle = EthOracle::new(
        components.scanner.clone(),
        components.cosmos.clone(),
        components.broadcaster.clone(),
        components.oracle,
        metrics.clone(),
    );
    handles.push(spawn_loop(
        Arc::new(oracle),
        loop_period(block_time, loops.oracle_loop_multiplier),
        cancel.clone(),
        metrics.clone(),
    ));

    let signer = PeggySigner::new(
        components.wallet,
        peggy_id,
        components.cosmos.clone(),
        components.broadcaster.clone(),
        components.broadcast_retry,
        metrics.clone(),
    );
    handles.push(spawn_loop(
        Arc::new(signer),
        loop_period(block_time, loops.signer_loop_multiplier),
        cancel.clone(),
        metrics.clone(),
    ));

    if components.relayer.relay_valsets || components.relayer.relay_batches {
        let relayer = PeggyRelayer::new(
            components.scanner,
            components.cosmos.clone(),
            components.submitter,
            peggy_id,
            components.relayer,
            metrics.clone(),
        );
        handles.push(spawn_loop(
            Arc::new(relayer),
            loop_period(block_time, loops.relayer_loop_multiplier),
            cancel.clone(),
            metrics.clone(),
        ));
    } else {
        info!("Relayer disabled");
    }

    if config.requester.enabled {
        let requester = BatchRequester::new(
            components.cosmos,
            components.broadcaster,
            components.min_batch_fee,
            components.broadcast_retry,
            metrics.clone(),
        );
        handles.push(spawn_loop(
            Arc::new(requester),
            loop_period(block_time, loops.requester_loop_multiplier),
            cancel.clone(),
            metrics,
        ));
    } else {
        info!("Batch requester disabled");
    }

    info!(
        "Started {} loops with block time {:?}",
        handles.len(),
        block_time
    );
    OrchestratorHandle { cancel, handles }
}

/// Waits for SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c()
                    .await
                    .tap_err(|e| warn!("Failed to listen for ctrl-c: {:?}", e));
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c()
            .await
            .tap_err(|e| warn!("Failed to listen for ctrl-c: {:?}", e));
    }
    info!("Shutdown signal received");
}
