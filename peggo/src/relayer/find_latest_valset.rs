// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{compare_valsets, ValsetComparison};
use crate::cosmos_client::CosmosQueryClient;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::decode_valset_updated;
use crate::metrics::OrchestratorMetrics;
use crate::scanner::{chunk_ranges, valset_updated_filter, EventScanner};
use crate::types::Valset;
use ethers::providers::JsonRpcClient;
use tracing::{debug, error, info, warn};

/// Rebuilds the valset the Peggy contract currently trusts.
///
/// The contract only stores a checkpoint, so the full set is recovered from the
/// `ValsetUpdatedEvent` carrying the contract's current valset nonce. Windows
/// are searched from the chain head back to `lower_bound`. The source chain's
/// copy of the same nonce is only used to fill in `height` and to flag
/// inconsistencies.
pub async fn find_latest_valset<P>(
    scanner: &EventScanner<P>,
    cosmos: &dyn CosmosQueryClient,
    lower_bound: u64,
    metrics: &OrchestratorMetrics,
) -> OrchestratorResult<Valset>
where
    P: JsonRpcClient + 'static,
{
    let eth = scanner.client();
    let latest_block = eth.get_latest_block_number().await?;
    let nonce = eth.get_valset_nonce().await?;

    let source_valset = match cosmos.valset_at_nonce(nonce).await {
        Ok(valset) => valset,
        Err(e) => {
            warn!(nonce, "Could not fetch source chain valset: {:?}", e);
            None
        }
    };

    let peggy = eth.peggy_address();
    let window = scanner.config().max_block_range;
    for (from, to) in chunk_ranges(lower_bound, latest_block, window).into_iter().rev() {
        let logs = scanner
            .fetch_logs(&valset_updated_filter(peggy, nonce, from, to))
            .await?;
        let mut latest_event = None;
        for log in &logs {
            let event = decode_valset_updated(log)?;
            if event.new_valset_nonce != nonce {
                debug!(
                    "Skipping ValsetUpdatedEvent with nonce {} while looking for {}",
                    event.new_valset_nonce, nonce
                );
                continue;
            }
            let key = (event.meta.block_number, event.meta.log_index);
            if latest_event
                .as_ref()
                .map_or(true, |(best, _)| key > *best)
            {
                latest_event = Some((key, event));
            }
        }
        let Some((_, event)) = latest_event else {
            continue;
        };

        let mut valset = event.to_valset();
        valset.validate()?;
        if let Some(source) = &source_valset {
            valset.height = source.height;
            if compare_valsets(Some(source), &valset) == ValsetComparison::Anomaly {
                metrics.valset_anomalies.inc();
                error!(
                    nonce,
                    "Peggy contract and source chain disagree on valset members: {:?} vs {:?}",
                    valset.members,
                    source.members
                );
            }
        }
        info!(
            nonce,
            block = event.meta.block_number,
            members = valset.members.len(),
            "Found trusted valset"
        );
        return Ok(valset);
    }

    error!(
        nonce,
        from_block = lower_bound,
        to_block = latest_block,
        "No ValsetUpdatedEvent for the trusted valset nonce"
    );
    Err(OrchestratorError::ValsetNotFound {
        nonce,
        from_block: lower_bound,
        to_block: latest_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relayer::tests::test_relayer;
    use crate::test_utils::{
        init_for_testing, mock_eth_call_uint, mock_latest_block, mock_logs,
        valset_updated_log, valset_updated_log_from_fixture, VALSET_UPDATED_1_MEMBER,
        VALSET_UPDATED_99_MEMBERS,
    };
    use crate::types::{BridgeValidator, BridgeValidators};
    use ethers::types::Address as EthAddress;
    use std::collections::HashSet;
    use std::str::FromStr;

    const TRUSTED_NONCE: u64 = 2;

    fn addr(s: &str) -> EthAddress {
        EthAddress::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_find_latest_valset_one_member() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 3000);
        mock_eth_call_uint(&t.mock, TRUSTED_NONCE);
        // Newest window is empty, the event sits in the older one.
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, TRUSTED_NONCE, 2000, 3000),
            vec![],
        );
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, TRUSTED_NONCE, 0, 1999),
            vec![valset_updated_log_from_fixture(
                t.peggy,
                TRUSTED_NONCE,
                VALSET_UPDATED_1_MEMBER,
                1500,
                0,
            )],
        );

        let valset = t.relayer.current_trusted_valset().await.unwrap();
        assert_eq!(valset.nonce, TRUSTED_NONCE);
        assert_eq!(
            valset.members,
            BridgeValidators(vec![BridgeValidator::new(
                addr("0x05a64fe82628217900ced80bf3747b5ef88bfa21"),
                4294967295
            )])
        );
        assert_eq!(t.mock.request_count("eth_getLogs"), 2);
        assert_eq!(t.metrics.trusted_valset_nonce.get(), TRUSTED_NONCE as i64);
    }

    #[tokio::test]
    async fn test_find_latest_valset_99_members() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 3000);
        mock_eth_call_uint(&t.mock, TRUSTED_NONCE);
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, TRUSTED_NONCE, 2000, 3000),
            vec![valset_updated_log_from_fixture(
                t.peggy,
                TRUSTED_NONCE,
                VALSET_UPDATED_99_MEMBERS,
                2500,
                3,
            )],
        );

        let valset = t.relayer.current_trusted_valset().await.unwrap();
        assert_eq!(valset.members.len(), 99);
        assert!(!valset.members.has_duplicates());
        assert_eq!(valset.members.total_power(), 4294967287);
        // Positional reconstruction keeps the contract's order.
        assert_eq!(
            valset.members.0[0],
            BridgeValidator::new(addr("0x005362286505c44486f2091db1113c6b97ffb569"), 44282957)
        );
        assert_eq!(
            valset.members.0[98],
            BridgeValidator::new(addr("0xc1c517f6c7c236235cdd2438576362346162eabf"), 4427)
        );
        let addresses: HashSet<_> = valset.members.addresses().into_iter().collect();
        assert_eq!(addresses.len(), 99);
        // Only the newest window was needed.
        assert_eq!(t.mock.request_count("eth_getLogs"), 1);
    }

    #[tokio::test]
    async fn test_find_latest_valset_prefers_latest_event_and_source_height() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 100);
        mock_eth_call_uint(&t.mock, 7);
        let a = EthAddress::from_low_u64_be(0xa);
        let b = EthAddress::from_low_u64_be(0xb);
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, 7, 0, 100),
            vec![
                valset_updated_log(t.peggy, 7, 20, vec![b, a], vec![6, 5], 90, 1),
                valset_updated_log(t.peggy, 7, 11, vec![a], vec![10], 40, 0),
            ],
        );
        t.cosmos.add_valset(Valset {
            nonce: 7,
            members: BridgeValidators(vec![
                BridgeValidator::new(b, 6),
                BridgeValidator::new(a, 5),
            ]),
            height: 321,
            ..Default::default()
        });

        let valset = t.relayer.current_trusted_valset().await.unwrap();
        assert_eq!(valset.members.addresses(), vec![b, a]);
        assert_eq!(valset.height, 321);
        assert_eq!(t.metrics.valset_anomalies.get(), 0);
    }

    #[tokio::test]
    async fn test_find_latest_valset_flags_source_disagreement() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 100);
        mock_eth_call_uint(&t.mock, 7);
        let a = EthAddress::from_low_u64_be(0xa);
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, 7, 0, 100),
            vec![valset_updated_log(t.peggy, 7, 20, vec![a], vec![10], 90, 1)],
        );
        t.cosmos.add_valset(Valset {
            nonce: 7,
            members: BridgeValidators(vec![BridgeValidator::new(EthAddress::from_low_u64_be(0xc), 10)]),
            ..Default::default()
        });

        let valset = t.relayer.current_trusted_valset().await.unwrap();
        assert_eq!(valset.members.addresses(), vec![a]);
        assert_eq!(t.metrics.valset_anomalies.get(), 1);
    }

    #[tokio::test]
    async fn test_find_latest_valset_not_found() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 3000);
        mock_eth_call_uint(&t.mock, 5);
        mock_logs(&t.mock, &valset_updated_filter(t.peggy, 5, 2000, 3000), vec![]);
        mock_logs(&t.mock, &valset_updated_filter(t.peggy, 5, 0, 1999), vec![]);

        let err = t.relayer.current_trusted_valset().await.unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::ValsetNotFound {
                nonce: 5,
                from_block: 0,
                to_block: 3000
            }
        );
    }

    #[tokio::test]
    async fn test_find_latest_valset_rejects_duplicate_members() {
        init_for_testing();
        let t = test_relayer(0.0);
        mock_latest_block(&t.mock, 100);
        mock_eth_call_uint(&t.mock, 3);
        let a = EthAddress::from_low_u64_be(0xa);
        mock_logs(
            &t.mock,
            &valset_updated_filter(t.peggy, 3, 0, 100),
            vec![valset_updated_log(t.peggy, 3, 4, vec![a, a], vec![5, 5], 50, 0)],
        );
        let err = t.relayer.current_trusted_valset().await.unwrap_err();
        assert_eq!(err.error_type(), "invalid_valset");
    }
}
