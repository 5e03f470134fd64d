// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

#![allow(clippy::too_many_arguments)]

pub mod abi;
pub mod checkpoint;
pub mod config;
pub mod cosmos_client;
pub mod error;
pub mod eth_client;
pub mod eth_transaction_builder;
pub mod events;
pub mod loops;
pub mod metered_eth_provider;
pub mod metrics;
pub mod node;
pub mod oracle;
pub mod relayer;
pub mod requester;
pub mod scanner;
pub mod signer;
pub mod types;
pub mod utils;
pub mod version;

#[cfg(test)]
pub mod eth_mock_provider;

#[cfg(test)]
pub mod test_utils;

/// Retries `$func` with exponential backoff until it succeeds or
/// `$max_elapsed_time` runs out. Every error counts as transient.
#[macro_export]
macro_rules! retry_with_max_elapsed_time {
    ($func:expr, $max_elapsed_time:expr) => {{
        // The following delay sequence (in secs) will be used, applied with jitter
        // 0.4, 0.8, 1.6, 3.2, 6.4, 12.8, 25.6, 51.2, 102.4, 120, 120 ...
        let backoff = $crate::utils::exponential_backoff(Some($max_elapsed_time));
        backoff::future::retry(backoff, || {
            let fut = async {
                let result = $func.await;
                match result {
                    Ok(_) => Ok(result),
                    Err(e) => {
                        tracing::debug!("Retrying due to error: {:?}", e);
                        Err(backoff::Error::transient(e))
                    }
                }
            };
            std::boxed::Box::pin(fut)
        })
        .await
    }};
}
