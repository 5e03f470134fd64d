// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::OrchestratorResult;
use crate::metrics::OrchestratorMetrics;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// One unit of periodic work.
#[async_trait]
pub trait LoopTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&self) -> OrchestratorResult<()>;
}

/// Runs `task` every `period` until `cancel` fires. Errors and panics of a
/// tick are logged and counted; the loop carries on with the next tick.
/// Cancellation also drops a tick that is still in flight.
pub fn spawn_loop<T: LoopTask>(
    task: Arc<T>,
    period: Duration,
    cancel: CancellationToken,
    metrics: Arc<OrchestratorMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = task.name();
        info!(loop = name, "Starting loop with period {:?}", period);
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(loop = name, "Loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => {
                            info!(loop = name, "Loop cancelled during tick");
                            break;
                        }
                        result = AssertUnwindSafe(task.tick()).catch_unwind() => result,
                    };
                    match result {
                        Ok(Ok(())) => {
                            metrics.loop_ticks.with_label_values(&[name]).inc();
                        }
                        Ok(Err(e)) => {
                            error!(loop = name, "Loop tick failed: {}", e);
                            metrics
                                .loop_failures
                                .with_label_values(&[name, e.error_type()])
                                .inc();
                        }
                        Err(_) => {
                            error!(loop = name, "Loop tick panicked");
                            metrics
                                .loop_failures
                                .with_label_values(&[name, "panic"])
                                .inc();
                        }
                    }
                }
            }
        }
    })
}
