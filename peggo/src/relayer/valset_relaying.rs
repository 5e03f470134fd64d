// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{collect_signatures, compare_valsets, PeggyRelayer, ValsetComparison};
use crate::checkpoint::valset_checkpoint;
use crate::error::OrchestratorResult;
use crate::types::Valset;
use ethers::providers::JsonRpcClient;
use tracing::{debug, info, warn};

/// What a valset relay attempt left on the contract.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ValsetRelay {
    /// Nothing relayable; the trusted set stands.
    Unchanged,
    /// The contract now holds this set.
    Relayed(Valset),
    /// Someone else moved the contract past the candidate. The trusted set
    /// is unknown until it is resolved again.
    Superseded { onchain_nonce: u64 },
}

impl<P> PeggyRelayer<P>
where
    P: JsonRpcClient + 'static,
{
    /// Relays the newest source valset that gathered enough confirmations from
    /// `current`.
    pub(crate) async fn relay_valsets(&self, current: &Valset) -> OrchestratorResult<ValsetRelay> {
        let mut candidates = self.cosmos.latest_valsets().await?;
        candidates.sort_by(|a, b| b.nonce.cmp(&a.nonce));
        let total_power = current.members.total_power();

        for candidate in candidates {
            if candidate.nonce <= current.nonce {
                break;
            }
            if let Err(e) = candidate.validate() {
                warn!(nonce = candidate.nonce, "Skipping invalid valset: {:?}", e);
                continue;
            }
            let confirms = self.cosmos.valset_confirms(candidate.nonce).await?;
            let checkpoint = valset_checkpoint(self.peggy_id, &candidate);
            let signatures = collect_signatures(current, checkpoint, &confirms);
            if !self
                .config
                .threshold
                .is_met(signatures.confirmed_power, total_power)
            {
                debug!(
                    nonce = candidate.nonce,
                    "Valset has {} of {} power confirmed, waiting",
                    signatures.confirmed_power,
                    total_power
                );
                continue;
            }
            if compare_valsets(Some(current), &candidate) != ValsetComparison::NeedsRelay {
                return Ok(ValsetRelay::Unchanged);
            }

            info!(
                "Relaying valset {} -> {} with {} signatures",
                current.nonce,
                candidate.nonce,
                signatures.signer_count()
            );
            let submitted = self
                .submit_with_retry(
                    "updateValset",
                    candidate.nonce,
                    || self.submitter.update_valset(&candidate, current, &signatures),
                    || self.eth().get_valset_nonce(),
                )
                .await?;
            if submitted.is_some() {
                self.metrics.valsets_relayed.inc();
                return Ok(ValsetRelay::Relayed(candidate));
            }
            let onchain_nonce = self.eth().get_valset_nonce().await?;
            if onchain_nonce == candidate.nonce {
                return Ok(ValsetRelay::Relayed(candidate));
            }
            warn!(
                "Contract valset nonce is {} after relaying {}",
                onchain_nonce, candidate.nonce
            );
            return Ok(ValsetRelay::Superseded { onchain_nonce });
        }
        Ok(ValsetRelay::Unchanged)
    }
}
