// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Relays confirmed valset updates and transaction batches to the Peggy contract.

use crate::checkpoint::{parse_signature, recover_signature};
use crate::cosmos_client::CosmosQueryClient;
use crate::error::OrchestratorResult;
use crate::eth_client::EthClient;
use crate::eth_transaction_builder::{PeggySubmitter, SignatureSet};
use crate::loops::LoopTask;
use crate::metrics::OrchestratorMetrics;
use crate::scanner::EventScanner;
use crate::types::{Confirmation, PowerThreshold, Valset};
use crate::utils::exponential_backoff;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use ethers::providers::JsonRpcClient;
use ethers::types::{Address as EthAddress, TxHash, H256, U256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

mod batch_relaying;
pub mod find_latest_valset;
mod valset_relaying;

use valset_relaying::ValsetRelay;

pub use find_latest_valset::find_latest_valset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValsetComparison {
    /// Same nonce and membership, or nothing to compare.
    Same,
    /// The candidate is older than the reference.
    Stale,
    /// The candidate is newer and must be relayed.
    NeedsRelay,
    /// Equal nonces with different membership. Never relayed.
    Anomaly,
}

pub fn compare_valsets(current: Option<&Valset>, latest: &Valset) -> ValsetComparison {
    let Some(current) = current else {
        return if latest.is_trivial() {
            ValsetComparison::Same
        } else {
            ValsetComparison::NeedsRelay
        };
    };
    if latest.nonce < current.nonce {
        ValsetComparison::Stale
    } else if latest.nonce > current.nonce {
        ValsetComparison::NeedsRelay
    } else if current.same_members(latest) {
        ValsetComparison::Same
    } else {
        ValsetComparison::Anomaly
    }
}

/// True when `latest` differs from `current`. An equal-nonce membership
/// mismatch counts as a difference and is logged as a consistency violation.
pub fn check_if_valsets_differ(current: Option<&Valset>, latest: &Valset) -> bool {
    match compare_valsets(current, latest) {
        ValsetComparison::Same | ValsetComparison::Stale => false,
        ValsetComparison::NeedsRelay => true,
        ValsetComparison::Anomaly => {
            error!(
                nonce = latest.nonce,
                "Valsets with equal nonce have different members: {:?} vs {:?}",
                current.map(|c| &c.members),
                latest.members
            );
            true
        }
    }
}

/// Verifies `confirms` against `checkpoint` and lays out the valid ones over
/// `trusted`. Signatures that do not recover to the claimed signer, and
/// signers outside the trusted set, contribute nothing.
pub fn collect_signatures<C: Confirmation>(
    trusted: &Valset,
    checkpoint: H256,
    confirms: &[C],
) -> SignatureSet {
    let mut verified = HashMap::new();
    for confirm in confirms {
        let claimed = confirm.eth_signer();
        if trusted.members.power_of(&claimed) == 0 {
            debug!("Ignoring confirm from {:?}: not in trusted valset", claimed);
            continue;
        }
        let recovered = parse_signature(confirm.signature_hex())
            .and_then(|signature| Ok((recover_signature(&signature, checkpoint)?, signature)));
        match recovered {
            Ok((signer, signature)) if signer == claimed => {
                verified.entry(claimed).or_insert(signature);
            }
            Ok((signer, _)) => {
                warn!(
                    "Confirm claims signer {:?} but recovers to {:?}",
                    claimed, signer
                );
            }
            Err(e) => warn!("Invalid confirm signature from {:?}: {:?}", claimed, e),
        }
    }
    SignatureSet::arrange(trusted, &verified)
}

const PROFIT_SCALE: u64 = 1_000_000_000;

/// Fees and gas cost are compared as raw integers; a multiplier of zero or
/// below disables the check. The multiplier keeps nine decimal places.
pub fn is_profitable(fees: U256, gas_cost: U256, profit_multiplier: f64) -> bool {
    if profit_multiplier <= 0.0 {
        return true;
    }
    let scaled = ((profit_multiplier * PROFIT_SCALE as f64).round() as u64).max(1);
    fees.saturating_mul(U256::from(PROFIT_SCALE)) >= gas_cost.saturating_mul(U256::from(scaled))
}

#[derive(Clone, Debug)]
pub struct RelayerConfig {
    pub relay_valsets: bool,
    pub relay_batches: bool,
    pub threshold: PowerThreshold,
    pub profit_multiplier: f64,
    pub max_submit_attempts: u32,
    /// Lowest block searched for ValsetUpdatedEvent logs.
    pub peggy_deployment_block: u64,
}

pub struct PeggyRelayer<P> {
    scanner: Arc<EventScanner<P>>,
    cosmos: Arc<dyn CosmosQueryClient>,
    submitter: Arc<dyn PeggySubmitter>,
    peggy_id: H256,
    config: RelayerConfig,
    metrics: Arc<OrchestratorMetrics>,
}

impl<P> PeggyRelayer<P>
where
    P: JsonRpcClient + 'static,
{
    pub fn new(
        scanner: Arc<EventScanner<P>>,
        cosmos: Arc<dyn CosmosQueryClient>,
        submitter: Arc<dyn PeggySubmitter>,
        peggy_id: H256,
        config: RelayerConfig,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            scanner,
            cosmos,
            submitter,
            peggy_id,
            config,
            metrics,
        }
    }

    fn eth(&self) -> &Arc<EthClient<P>> {
        self.scanner.client()
    }

    /// The valset the Peggy contract trusts right now.
    pub async fn current_trusted_valset(&self) -> OrchestratorResult<Valset> {
        let valset = find_latest_valset(
            &self.scanner,
            self.cosmos.as_ref(),
            self.config.peggy_deployment_block,
            &self.metrics,
        )
        .await?;
        self.metrics.trusted_valset_nonce.set(valset.nonce as i64);
        Ok(valset)
    }

    /// Submits with bounded retries. Returns `None` when another relayer got
    /// there first, detected from the error or from `onchain_nonce` having
    /// reached `target_nonce`.
    async fn submit_with_retry<S, SFut, N, NFut>(
        &self,
        what: &str,
        target_nonce: u64,
        mut submit: S,
        onchain_nonce: N,
    ) -> OrchestratorResult<Option<TxHash>>
    where
        S: FnMut() -> SFut,
        SFut: Future<Output = OrchestratorResult<TxHash>>,
        N: Fn() -> NFut,
        NFut: Future<Output = OrchestratorResult<u64>>,
    {
        let mut policy = exponential_backoff(None);
        let max_attempts = self.config.max_submit_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match submit().await {
                Ok(tx_hash) => return Ok(Some(tx_hash)),
                Err(e) if e.is_expected_race() => {
                    info!("{} nonce {} already relayed: {:?}", what, target_nonce, e);
                    return Ok(None);
                }
                Err(e) => e,
            };
            match onchain_nonce().await {
                Ok(nonce) if nonce >= target_nonce => {
                    info!(
                        "{} nonce {} landed on chain (now {}) despite {:?}",
                        what, target_nonce, nonce, err
                    );
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) => debug!("Could not re-read on-chain nonce: {:?}", e),
            }
            if attempt >= max_attempts {
                error!(
                    "{} nonce {} failed after {} attempts: {:?}",
                    what, target_nonce, attempt, err
                );
                return Err(err);
            }
            let delay = policy.next_backoff().unwrap_or(Duration::from_secs(1));
            warn!(
                "{} nonce {} attempt {}/{} failed, retrying in {:?}: {:?}",
                what, target_nonce, attempt, max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn relay(&self) -> OrchestratorResult<()> {
        let current = self.current_trusted_valset().await?;
        self.relay_from(current).await
    }

    /// Batches are signed against the set the contract holds after the
    /// valset step, so they wait a tick when that set is not known.
    async fn relay_from(&self, mut current: Valset) -> OrchestratorResult<()> {
        if self.config.relay_valsets {
            match self.relay_valsets(&current).await? {
                ValsetRelay::Unchanged => {}
                ValsetRelay::Relayed(relayed) => current = relayed,
                ValsetRelay::Superseded { onchain_nonce } => {
                    info!(
                        "Valset moved to nonce {} under us, skipping batches this tick",
                        onchain_nonce
                    );
                    return Ok(());
                }
            }
        }
        if self.config.relay_batches {
            self.relay_batches(&current).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P> LoopTask for PeggyRelayer<P>
where
    P: JsonRpcClient + 'static,
{
    fn name(&self) -> &'static str {
        "relayer"
    }

    async fn tick(&self) -> OrchestratorResult<()> {
        self.relay().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::{encode_signature, sign_checkpoint, valset_checkpoint};
    use crate::cosmos_client::mock::CosmosMockClient;
    use crate::eth_mock_provider::EthMockProvider;
    use crate::eth_transaction_builder::mock::MockSubmitter;
    use crate::scanner::ScanConfig;
    use crate::test_utils::{test_wallets, valset_of_wallets};
    use crate::types::{BridgeValidator, BridgeValidators, ValsetConfirm};
    use ethers::signers::{LocalWallet, Signer};

    pub(crate) struct TestRelayer {
        pub relayer: PeggyRelayer<EthMockProvider>,
        pub mock: EthMockProvider,
        pub cosmos: CosmosMockClient,
        pub submitter: MockSubmitter,
        pub peggy: EthAddress,
        pub metrics: Arc<OrchestratorMetrics>,
    }

    pub(crate) fn test_relayer(profit_multiplier: f64) -> TestRelayer {
        let mock = EthMockProvider::new();
        let peggy = EthAddress::random();
        let client = Arc::new(EthClient::new_mocked(mock.clone(), peggy));
        let scanner = Arc::new(EventScanner::new(
            client,
            ScanConfig {
                max_block_range: 2000,
                max_retry_duration: Duration::from_millis(50),
            },
        ));
        let cosmos = CosmosMockClient::default();
        let submitter = MockSubmitter::default();
        let metrics = Arc::new(OrchestratorMetrics::new_for_testing());
        let relayer = PeggyRelayer::new(
            scanner,
            Arc::new(cosmos.clone()),
            Arc::new(submitter.clone()),
            H256::from_low_u64_be(42),
            RelayerConfig {
                relay_valsets: true,
                relay_batches: true,
                threshold: PowerThreshold::from_fraction(0.66).unwrap(),
                profit_multiplier,
                max_submit_attempts: 2,
                peggy_deployment_block: 0,
            },
            metrics.clone(),
        );
        TestRelayer {
            relayer,
            mock,
            cosmos,
            submitter,
            peggy,
            metrics,
        }
    }

    pub(crate) fn valset_confirm(wallet: &LocalWallet, checkpoint: H256, nonce: u64) -> ValsetConfirm {
        ValsetConfirm {
            nonce,
            orchestrator: format!("umee1{:x}", wallet.address()),
            eth_address: wallet.address(),
            signature: encode_signature(&sign_checkpoint(wallet, checkpoint).unwrap()),
        }
    }

    fn valset(nonce: u64, members: &[(u64, u64)]) -> Valset {
        Valset {
            nonce,
            members: BridgeValidators(
                members
                    .iter()
                    .map(|(addr, power)| BridgeValidator::new(EthAddress::from_low_u64_be(*addr), *power))
                    .collect(),
            )
            .sorted(),
            ..Default::default()
        }
    }

    #[test]
    fn test_compare_both_empty() {
        assert_eq!(
            compare_valsets(Some(&Valset::default()), &Valset::default()),
            ValsetComparison::Same
        );
        assert!(!check_if_valsets_differ(Some(&Valset::default()), &Valset::default()));
    }

    #[test]
    fn test_compare_none_vs_trivial() {
        assert_eq!(compare_valsets(None, &Valset::default()), ValsetComparison::Same);
        assert!(!check_if_valsets_differ(None, &Valset::default()));
    }

    #[test]
    fn test_compare_none_vs_non_trivial() {
        let latest = valset(1, &[(1, 10)]);
        assert_eq!(compare_valsets(None, &latest), ValsetComparison::NeedsRelay);
        assert!(check_if_valsets_differ(None, &latest));
    }

    #[test]
    fn test_compare_descending_nonce_is_stale() {
        let current = valset(5, &[(1, 10)]);
        let older = valset(4, &[(2, 10)]);
        assert_eq!(compare_valsets(Some(&current), &older), ValsetComparison::Stale);
        assert!(!check_if_valsets_differ(Some(&current), &older));

        let newer = valset(6, &[(1, 10)]);
        assert_eq!(
            compare_valsets(Some(&current), &newer),
            ValsetComparison::NeedsRelay
        );
    }

    #[test]
    fn test_compare_equal_nonce_differing_membership() {
        let current = valset(5, &[(1, 10), (2, 20)]);
        let reordered = Valset {
            members: BridgeValidators(current.members.0.iter().rev().cloned().collect()),
            ..current.clone()
        };
        assert_eq!(
            compare_valsets(Some(&current), &reordered),
            ValsetComparison::Same
        );

        let different = valset(5, &[(1, 10), (3, 20)]);
        assert_eq!(
            compare_valsets(Some(&current), &different),
            ValsetComparison::Anomaly
        );
        assert!(check_if_valsets_differ(Some(&current), &different));
    }

    #[test]
    fn test_collect_signatures_ignores_bad_and_unknown_signers() {
        let wallets = test_wallets(4);
        let trusted = valset_of_wallets(3, &wallets[..3], &[40, 30, 30]);
        let checkpoint = valset_checkpoint(H256::zero(), &trusted);

        let good = valset_confirm(&wallets[0], checkpoint, 3);
        // Signed by an outsider.
        let outsider = valset_confirm(&wallets[3], checkpoint, 3);
        // Claims to be wallets[1] but was signed by wallets[2].
        let mut forged = valset_confirm(&wallets[2], checkpoint, 3);
        forged.eth_address = wallets[1].address();
        // Signed over the wrong checkpoint.
        let stale = valset_confirm(&wallets[2], H256::from_low_u64_be(1), 3);
        let garbage = ValsetConfirm {
            signature: "xyz".to_string(),
            ..good.clone()
        };

        let set = collect_signatures(
            &trusted,
            checkpoint,
            &[good.clone(), outsider, forged, stale, garbage, good],
        );
        assert_eq!(set.confirmed_power, 40);
        assert_eq!(set.signer_count(), 1);
    }

    #[test]
    fn test_threshold_on_collected_power() {
        let wallets = test_wallets(3);
        let trusted = valset_of_wallets(1, &wallets, &[33, 33, 34]);
        let checkpoint = valset_checkpoint(H256::zero(), &trusted);
        let threshold = PowerThreshold::from_fraction(0.66).unwrap();

        let two = collect_signatures(
            &trusted,
            checkpoint,
            &[
                valset_confirm(&wallets[0], checkpoint, 1),
                valset_confirm(&wallets[1], checkpoint, 1),
            ],
        );
        assert_eq!(two.confirmed_power, 66);
        assert!(threshold.is_met(two.confirmed_power, trusted.members.total_power()));

        let one = collect_signatures(
            &trusted,
            checkpoint,
            &[valset_confirm(&wallets[2], checkpoint, 1)],
        );
        assert!(!threshold.is_met(one.confirmed_power, trusted.members.total_power()));
    }

    #[test]
    fn test_is_profitable() {
        let gas_cost = U256::from(1_000_000u64);
        // Disabled gate always passes.
        assert!(is_profitable(U256::zero(), gas_cost, 0.0));
        assert!(is_profitable(U256::zero(), gas_cost, -1.0));
        assert!(is_profitable(U256::from(1_000_000u64), gas_cost, 1.0));
        assert!(!is_profitable(U256::from(999_999u64), gas_cost, 1.0));
        assert!(is_profitable(U256::from(1_500_000u64), gas_cost, 1.5));
        assert!(!is_profitable(U256::from(1_499_999u64), gas_cost, 1.5));
        // Tiny multipliers still gate.
        assert!(!is_profitable(U256::zero(), gas_cost, 0.0004));
        assert!(!is_profitable(U256::zero(), gas_cost, 1e-12));
        assert!(is_profitable(U256::from(400u64), gas_cost, 0.0004));
        // Fractions below a thousandth are kept.
        assert!(!is_profitable(U256::from(1_000_000u64), gas_cost, 1.0004));
        assert!(!is_profitable(U256::from(1_000_399u64), gas_cost, 1.0004));
        assert!(is_profitable(U256::from(1_000_400u64), gas_cost, 1.0004));
    }

    #[tokio::test]
    async fn test_submit_with_retry_outcomes() {
        use crate::error::OrchestratorError;
        let t = test_relayer(0.0);

        // Retries a hard failure, then succeeds.
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = t
            .relayer
            .submit_with_retry(
                "submitBatch",
                5,
                || {
                    let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(OrchestratorError::ProviderError("boom".to_string()))
                        } else {
                            Ok(TxHash::zero())
                        }
                    }
                },
                || async { Ok(4) },
            )
            .await
            .unwrap();
        assert_eq!(result, Some(TxHash::zero()));

        // The nonce landed anyway.
        let result = t
            .relayer
            .submit_with_retry(
                "submitBatch",
                5,
                || async { Err(OrchestratorError::ProviderError("timeout".to_string())) },
                || async { Ok(5) },
            )
            .await
            .unwrap();
        assert_eq!(result, None);

        // Expected race.
        let result = t
            .relayer
            .submit_with_retry(
                "updateValset",
                5,
                || async { Err(OrchestratorError::AlreadyRelayed("nonce".to_string())) },
                || async { Ok(0) },
            )
            .await
            .unwrap();
        assert_eq!(result, None);

        // Gives up after max attempts.
        let err = t
            .relayer
            .submit_with_retry(
                "submitBatch",
                5,
                || async { Err(OrchestratorError::ProviderError("insufficient funds".to_string())) },
                || async { Ok(4) },
            )
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "provider_error");
    }

    /// A valset v2 confirmed by every wallet, plus batch 5 confirmed by the
    /// same wallets. Every `eth_call` answers `onchain_nonce`.
    fn setup_valset_and_batch(t: &TestRelayer, wallets: &[LocalWallet], onchain_nonce: u64) {
        use crate::relayer::batch_relaying::tests::{batch, batch_confirm};
        use crate::test_utils::{mock_eth_call_uint, mock_latest_block};
        let v2 = valset_of_wallets(2, wallets, &[50, 30, 20]);
        let checkpoint = valset_checkpoint(H256::from_low_u64_be(42), &v2);
        t.cosmos.set_valset_confirms(
            2,
            wallets.iter().map(|w| valset_confirm(w, checkpoint, 2)).collect(),
        );
        t.cosmos.add_valset(v2);

        let token = EthAddress::from_low_u64_be(0xa);
        let pending = batch(5, token, 5, 0);
        t.cosmos.set_batch_confirms(
            5,
            token,
            wallets.iter().map(|w| batch_confirm(w, &pending)).collect(),
        );
        t.cosmos.add_batch(pending);

        mock_latest_block(&t.mock, 100);
        mock_eth_call_uint(&t.mock, onchain_nonce);
    }

    #[tokio::test]
    async fn test_batches_wait_when_valset_superseded() {
        use crate::error::OrchestratorError;
        use crate::eth_transaction_builder::mock::SubmittedTx;
        let t = test_relayer(0.0);
        let wallets = test_wallets(3);
        let current = valset_of_wallets(1, &wallets, &[40, 30, 30]);
        // A competitor relayed nonce 3 before our nonce 2 landed.
        setup_valset_and_batch(&t, &wallets, 3);
        t.submitter
            .push_result(Err(OrchestratorError::AlreadyRelayed("valset".to_string())));

        t.relayer.relay_from(current).await.unwrap();
        assert_eq!(t.submitter.attempts(), 1);
        assert!(!t
            .submitter
            .submitted()
            .iter()
            .any(|tx| matches!(tx, SubmittedTx::Batch { .. })));
    }

    #[tokio::test]
    async fn test_batches_follow_raced_valset_when_it_landed() {
        use crate::error::OrchestratorError;
        use crate::eth_transaction_builder::mock::SubmittedTx;
        let t = test_relayer(0.0);
        let wallets = test_wallets(3);
        let current = valset_of_wallets(1, &wallets, &[40, 30, 30]);
        // Someone relayed the same nonce 2 first.
        setup_valset_and_batch(&t, &wallets, 2);
        t.submitter
            .push_result(Err(OrchestratorError::AlreadyRelayed("valset".to_string())));

        t.relayer.relay_from(current).await.unwrap();
        assert_eq!(
            t.submitter.submitted(),
            vec![SubmittedTx::Batch {
                nonce: 5,
                token: EthAddress::from_low_u64_be(0xa),
                confirmed_power: 100,
            }]
        );
    }
}
