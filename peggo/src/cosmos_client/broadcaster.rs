// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::rest::{field, CosmosHttp};
use super::{BroadcastOutcome, CosmosBroadcastClient, PeggyMsg};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics::OrchestratorMetrics;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CODE_OK: u32 = 0;
const CODE_INSUFFICIENT_FEE: u32 = 13;
const CODE_TX_IN_MEMPOOL_CACHE: u32 = 19;
const CODE_MEMPOOL_FULL: u32 = 20;
const CODE_WRONG_SEQUENCE: u32 = 32;

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde_as(as = "DisplayFromStr")]
    pub account_number: u64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub sequence: u64,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SignRequest {
    pub chain_id: String,
    #[serde_as(as = "DisplayFromStr")]
    pub account_number: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub sequence: u64,
    pub signer: String,
    pub msgs: Vec<PeggyMsg>,
}

/// Turns a set of messages into signed transaction bytes.
#[async_trait]
pub trait CosmosTxSigner: Send + Sync {
    async fn sign(&self, request: &SignRequest) -> OrchestratorResult<Vec<u8>>;
}

/// Delegates signing to a key-holding service: `POST {signer-url}/sign`.
pub struct RemoteTxSigner {
    http: CosmosHttp,
}

impl RemoteTxSigner {
    pub fn new(http: CosmosHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CosmosTxSigner for RemoteTxSigner {
    async fn sign(&self, request: &SignRequest) -> OrchestratorResult<Vec<u8>> {
        const ROUTE: &str = "remote_sign";
        let value = self
            .http
            .post_path(ROUTE, "sign", request)
            .await
            .map_err(|e| match e {
                e if e.is_transient() => e,
                e => OrchestratorError::SignerError(e.to_string()),
            })?;
        let tx_bytes: String = field(&value, ROUTE, "tx_bytes")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(tx_bytes.as_bytes())
            .map_err(|e| OrchestratorError::SignerError(format!("invalid tx_bytes: {:?}", e)))?;
        if decoded.is_empty() {
            return Err(OrchestratorError::SignerError(
                "remote signer returned an empty transaction".to_string(),
            ));
        }
        Ok(decoded)
    }
}

#[derive(Clone, Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    txhash: String,
    #[serde(default)]
    raw_log: String,
}

/// Maps a CheckTx result onto an outcome. Sequence mismatches and a full
/// mempool are transient; claims the chain already holds are expected races.
pub fn classify_tx_response(
    code: u32,
    raw_log: &str,
    tx_hash: &str,
) -> OrchestratorResult<BroadcastOutcome> {
    let lower = raw_log.to_lowercase();
    match code {
        CODE_OK => Ok(BroadcastOutcome::Committed {
            tx_hash: tx_hash.to_string(),
        }),
        CODE_TX_IN_MEMPOOL_CACHE => Err(OrchestratorError::DuplicateClaim(format!(
            "tx {} already in mempool",
            tx_hash
        ))),
        CODE_WRONG_SEQUENCE | CODE_MEMPOOL_FULL => Err(OrchestratorError::TransientCosmosError(
            format!("code {}: {}", code, raw_log),
        )),
        _ if lower.contains("non contiguous event nonce") => Err(OrchestratorError::CosmosError(
            format!("code {}: {}", code, raw_log),
        )),
        _ if lower.contains("duplicate") || lower.contains("already") => Err(
            OrchestratorError::DuplicateClaim(format!("code {}: {}", code, raw_log)),
        ),
        CODE_INSUFFICIENT_FEE => Err(OrchestratorError::CosmosError(format!(
            "insufficient fee: {}",
            raw_log
        ))),
        _ => Err(OrchestratorError::CosmosError(format!(
            "code {}: {}",
            code, raw_log
        ))),
    }
}

/// Signs and broadcasts gravity messages for one orchestrator account.
/// The account sequence is cached and handed out under a lock, so concurrent
/// loops never sign two transactions with the same sequence.
pub struct CosmosBroadcaster<S> {
    http: CosmosHttp,
    signer: S,
    chain_id: String,
    orchestrator: String,
    account: Mutex<Option<AccountInfo>>,
    metrics: Arc<OrchestratorMetrics>,
}

impl<S: CosmosTxSigner> CosmosBroadcaster<S> {
    pub fn new(
        http: CosmosHttp,
        signer: S,
        chain_id: String,
        orchestrator: String,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            http,
            signer,
            chain_id,
            orchestrator,
            account: Mutex::new(None),
            metrics,
        }
    }

    async fn query_account(&self) -> OrchestratorResult<AccountInfo> {
        const ROUTE: &str = "auth_account";
        let path = format!("cosmos/auth/v1beta1/accounts/{}", self.orchestrator);
        let value = self.http.get(ROUTE, &path, &[]).await?;
        let account: AccountInfo = field(&value, ROUTE, "account")?;
        debug!(
            "Fetched account {} number {} sequence {}",
            self.orchestrator, account.account_number, account.sequence
        );
        Ok(account)
    }

    async fn sign_and_send(
        &self,
        account: &AccountInfo,
        msgs: Vec<PeggyMsg>,
    ) -> OrchestratorResult<TxResponse> {
        let request = SignRequest {
            chain_id: self.chain_id.clone(),
            account_number: account.account_number,
            sequence: account.sequence,
            signer: self.orchestrator.clone(),
            msgs,
        };
        let tx_bytes = self.signer.sign(&request).await?;
        let body = serde_json::json!({
            "tx_bytes": base64::engine::general_purpose::STANDARD.encode(tx_bytes),
            "mode": "BROADCAST_MODE_SYNC",
        });
        let value = self
            .http
            .post_path("broadcast_tx", "cosmos/tx/v1beta1/txs", &body)
            .await?;
        field(&value, "broadcast_tx", "tx_response")
    }
}

#[async_trait]
impl<S: CosmosTxSigner> CosmosBroadcastClient for CosmosBroadcaster<S> {
    fn orchestrator_address(&self) -> &str {
        &self.orchestrator
    }

    async fn broadcast(&self, msgs: Vec<PeggyMsg>) -> OrchestratorResult<BroadcastOutcome> {
        let mut guard = self.account.lock().await;
        let account = match guard.as_ref() {
            Some(account) => account.clone(),
            None => {
                let account = self.query_account().await?;
                guard.replace(account.clone());
                account
            }
        };
        let msg_count = msgs.len();
        let result = self
            .sign_and_send(&account, msgs)
            .await
            .and_then(|resp| {
                let outcome = classify_tx_response(resp.code, &resp.raw_log, &resp.txhash);
                // An identical tx already in the mempool consumed this sequence too.
                if outcome.is_ok() || resp.code == CODE_TX_IN_MEMPOOL_CACHE {
                    if let Some(cached) = guard.as_mut() {
                        cached.sequence += 1;
                    }
                }
                outcome
            });

        match &result {
            Ok(BroadcastOutcome::Committed { tx_hash }) => {
                info!(
                    "Broadcast {} msgs in tx {} (sequence {})",
                    msg_count, tx_hash, account.sequence
                );
                self.metrics
                    .cosmos_broadcasts
                    .with_label_values(&["committed"])
                    .inc();
            }
            Ok(BroadcastOutcome::AlreadyAccepted { .. }) => {
                self.metrics
                    .cosmos_broadcasts
                    .with_label_values(&["already_accepted"])
                    .inc();
            }
            Err(e) => {
                if !matches!(e, OrchestratorError::DuplicateClaim(_)) {
                    // Re-read the sequence from chain before the next attempt.
                    guard.take();
                }
                warn!("Broadcast of {} msgs failed: {:?}", msg_count, e);
                self.metrics
                    .cosmos_broadcasts
                    .with_label_values(&[e.error_type()])
                    .inc();
            }
        }
        result
    }
}
