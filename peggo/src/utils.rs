// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{OrchestratorError, OrchestratorResult};
use anyhow::anyhow;
use ethers::signers::{LocalWallet, Signer};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Backoff used for every retried call: 0.4s doubling up to 120s, with jitter.
pub fn exponential_backoff(max_elapsed_time: Option<Duration>) -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_millis(400),
        randomization_factor: 0.1,
        multiplier: 2.0,
        max_interval: Duration::from_secs(120),
        max_elapsed_time,
        ..Default::default()
    }
}

/// Retries `op` while it fails with a transient error, for at most `max_elapsed_time`.
/// Non-transient errors are returned immediately.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    max_elapsed_time: Duration,
    mut op: F,
) -> OrchestratorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OrchestratorResult<T>>,
{
    backoff::future::retry(exponential_backoff(Some(max_elapsed_time)), || {
        let fut = op();
        async move {
            fut.await.map_err(|e| {
                if e.is_transient() {
                    tracing::debug!("Retrying {} after transient error: {:?}", what, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}

/// Reads a hex encoded secp256k1 private key (with or without `0x`) from `path`.
pub fn read_eth_key(path: &Path) -> anyhow::Result<LocalWallet> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Failed to read eth key from {}: {:?}", path.display(), e))?;
    let wallet = LocalWallet::from_str(contents.trim().trim_start_matches("0x"))
        .map_err(|e| anyhow!("Invalid eth key in {}: {:?}", path.display(), e))?;
    tracing::debug!("Loaded orchestrator eth key for {:?}", wallet.address());
    Ok(wallet)
}

pub fn wallet_with_chain_id(wallet: LocalWallet, chain_id: u64) -> LocalWallet {
    wallet.with_chain_id(chain_id)
}

/// Bech32 rendering of a 20 byte account address.
pub fn to_bech32(prefix: &str, bytes: &[u8]) -> OrchestratorResult<String> {
    use bech32::ToBase32;
    bech32::encode(prefix, bytes.to_base32(), bech32::Variant::Bech32)
        .map_err(|e| OrchestratorError::Generic(format!("bech32 encoding failed: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_transient_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: OrchestratorResult<()> =
            retry_transient("permanent", Duration::from_secs(10), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OrchestratorError::CosmosError("bad request".to_string())) }
            })
            .await;
        assert_eq!(result.unwrap_err().error_type(), "cosmos_error");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_transient_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_transient("flaky", Duration::from_secs(10), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(OrchestratorError::TransientCosmosError("sequence".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_read_eth_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eth.key");
        std::fs::write(
            &path,
            "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318\n",
        )
        .unwrap();
        let wallet = read_eth_key(&path).unwrap();
        assert_eq!(
            format!("{:?}", wallet.address()),
            "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"
        );
        std::fs::write(&path, "not a key").unwrap();
        assert!(read_eth_key(&path).is_err());
    }

    #[test]
    fn test_to_bech32() {
        let encoded = to_bech32("umee", &[0u8; 20]).unwrap();
        assert!(encoded.starts_with("umee1"));
        assert_eq!(encoded.len(), "umee1".len() + 32 + 6);
    }
}
