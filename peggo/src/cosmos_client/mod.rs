// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source chain access: the gravity module's query surface and message broadcasting.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{
    decimal_u256, BatchConfirm, BatchFees, BridgeValidators, LastClaimEvent, TransactionBatch,
    Valset, ValsetConfirm,
};
use crate::utils::retry_transient;
use async_trait::async_trait;
use ethers::types::{Address as EthAddress, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::time::Duration;

pub mod broadcaster;
#[cfg(test)]
pub mod mock;
pub mod rest;

pub use broadcaster::CosmosBroadcaster;
pub use rest::CosmosRestClient;

#[async_trait]
pub trait CosmosQueryClient: Send + Sync {
    async fn current_valset(&self) -> OrchestratorResult<Valset>;

    async fn valset_at_nonce(&self, nonce: u64) -> OrchestratorResult<Option<Valset>>;

    /// Most recent valset requests, in no particular order.
    async fn latest_valsets(&self) -> OrchestratorResult<Vec<Valset>>;

    async fn valset_confirms(&self, nonce: u64) -> OrchestratorResult<Vec<ValsetConfirm>>;

    /// Valsets `orchestrator` has not confirmed yet.
    async fn oldest_unsigned_valsets(&self, orchestrator: &str)
        -> OrchestratorResult<Vec<Valset>>;

    async fn oldest_unsigned_batch(
        &self,
        orchestrator: &str,
    ) -> OrchestratorResult<Option<TransactionBatch>>;

    async fn latest_batches(&self) -> OrchestratorResult<Vec<TransactionBatch>>;

    async fn batch_confirms(
        &self,
        nonce: u64,
        token_contract: EthAddress,
    ) -> OrchestratorResult<Vec<BatchConfirm>>;

    async fn last_claim_event(&self, orchestrator: &str) -> OrchestratorResult<LastClaimEvent>;

    async fn batch_fees(&self) -> OrchestratorResult<Vec<BatchFees>>;
}

#[async_trait]
pub trait CosmosBroadcastClient: Send + Sync {
    /// Bech32 account that signs every message we send.
    fn orchestrator_address(&self) -> &str;

    async fn broadcast(&self, msgs: Vec<PeggyMsg>) -> OrchestratorResult<BroadcastOutcome>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Committed { tx_hash: String },
    /// The chain already holds an identical claim or confirmation.
    AlreadyAccepted { reason: String },
}

/// gravity.v1 messages in their amino-JSON shape.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum PeggyMsg {
    #[serde(rename = "/gravity.v1.MsgSendToCosmosClaim")]
    SendToCosmosClaim {
        #[serde_as(as = "DisplayFromStr")]
        event_nonce: u64,
        #[serde_as(as = "DisplayFromStr")]
        block_height: u64,
        token_contract: EthAddress,
        #[serde(with = "decimal_u256")]
        amount: U256,
        ethereum_sender: EthAddress,
        cosmos_receiver: String,
        orchestrator: String,
    },
    #[serde(rename = "/gravity.v1.MsgBatchSendToEthClaim")]
    BatchSendToEthClaim {
        #[serde_as(as = "DisplayFromStr")]
        event_nonce: u64,
        #[serde_as(as = "DisplayFromStr")]
        block_height: u64,
        #[serde_as(as = "DisplayFromStr")]
        batch_nonce: u64,
        token_contract: EthAddress,
        orchestrator: String,
    },
    #[serde(rename = "/gravity.v1.MsgERC20DeployedClaim")]
    Erc20DeployedClaim {
        #[serde_as(as = "DisplayFromStr")]
        event_nonce: u64,
        #[serde_as(as = "DisplayFromStr")]
        block_height: u64,
        cosmos_denom: String,
        token_contract: EthAddress,
        name: String,
        symbol: String,
        #[serde_as(as = "DisplayFromStr")]
        decimals: u64,
        orchestrator: String,
    },
    #[serde(rename = "/gravity.v1.MsgValsetUpdatedClaim")]
    ValsetUpdatedClaim {
        #[serde_as(as = "DisplayFromStr")]
        event_nonce: u64,
        #[serde_as(as = "DisplayFromStr")]
        valset_nonce: u64,
        #[serde_as(as = "DisplayFromStr")]
        block_height: u64,
        members: BridgeValidators,
        #[serde(with = "decimal_u256")]
        reward_amount: U256,
        reward_token: EthAddress,
        orchestrator: String,
    },
    #[serde(rename = "/gravity.v1.MsgValsetConfirm")]
    ValsetConfirm {
        #[serde_as(as = "DisplayFromStr")]
        nonce: u64,
        orchestrator: String,
        eth_address: EthAddress,
        signature: String,
    },
    #[serde(rename = "/gravity.v1.MsgConfirmBatch")]
    ConfirmBatch {
        #[serde_as(as = "DisplayFromStr")]
        nonce: u64,
        token_contract: EthAddress,
        eth_signer: EthAddress,
        orchestrator: String,
        signature: String,
    },
    #[serde(rename = "/gravity.v1.MsgRequestBatch")]
    RequestBatch { orchestrator: String, denom: String },
}

impl PeggyMsg {
    /// Event nonce for claims, `None` for confirmations and requests.
    pub fn event_nonce(&self) -> Option<u64> {
        match self {
            PeggyMsg::SendToCosmosClaim { event_nonce, .. }
            | PeggyMsg::BatchSendToEthClaim { event_nonce, .. }
            | PeggyMsg::Erc20DeployedClaim { event_nonce, .. }
            | PeggyMsg::ValsetUpdatedClaim { event_nonce, .. } => Some(*event_nonce),
            _ => None,
        }
    }

    pub fn type_url(&self) -> &'static str {
        match self {
            PeggyMsg::SendToCosmosClaim { .. } => "/gravity.v1.MsgSendToCosmosClaim",
            PeggyMsg::BatchSendToEthClaim { .. } => "/gravity.v1.MsgBatchSendToEthClaim",
            PeggyMsg::Erc20DeployedClaim { .. } => "/gravity.v1.MsgERC20DeployedClaim",
            PeggyMsg::ValsetUpdatedClaim { .. } => "/gravity.v1.MsgValsetUpdatedClaim",
            PeggyMsg::ValsetConfirm { .. } => "/gravity.v1.MsgValsetConfirm",
            PeggyMsg::ConfirmBatch { .. } => "/gravity.v1.MsgConfirmBatch",
            PeggyMsg::RequestBatch { .. } => "/gravity.v1.MsgRequestBatch",
        }
    }
}

/// Broadcasts `msgs`, retrying transient failures for up to `max_elapsed_time`.
/// A claim or confirmation the chain already holds is reported as success.
pub async fn broadcast_with_retry<C>(
    client: &C,
    msgs: Vec<PeggyMsg>,
    max_elapsed_time: Duration,
) -> OrchestratorResult<BroadcastOutcome>
where
    C: CosmosBroadcastClient + ?Sized,
{
    let what = msgs.first().map(|m| m.type_url()).unwrap_or("empty tx");
    match retry_transient(what, max_elapsed_time, || client.broadcast(msgs.clone())).await {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_expected_race() => {
            tracing::debug!("{} already accepted by the chain: {:?}", what, e);
            Ok(BroadcastOutcome::AlreadyAccepted {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn missing_field(route: &str, field: &str) -> OrchestratorError {
    OrchestratorError::CosmosError(format!("{} response has no `{}` field", route, field))
}
