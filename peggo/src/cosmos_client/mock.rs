// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory source chain used by tests.

use super::{BroadcastOutcome, CosmosBroadcastClient, CosmosQueryClient, PeggyMsg};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{
    BatchConfirm, BatchFees, LastClaimEvent, TransactionBatch, Valset, ValsetConfirm,
};
use async_trait::async_trait;
use ethers::types::Address as EthAddress;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[allow(clippy::type_complexity)]
#[derive(Clone, Debug)]
pub struct CosmosMockClient {
    // does not change during tests
    orchestrator: String,
    valsets: Arc<Mutex<HashMap<u64, Valset>>>,
    current_valset: Arc<Mutex<Option<Valset>>>,
    valset_confirms: Arc<Mutex<HashMap<u64, Vec<ValsetConfirm>>>>,
    unsigned_valsets: Arc<Mutex<Vec<Valset>>>,
    unsigned_batch: Arc<Mutex<Option<TransactionBatch>>>,
    batches: Arc<Mutex<Vec<TransactionBatch>>>,
    batch_confirms: Arc<Mutex<HashMap<(u64, EthAddress), Vec<BatchConfirm>>>>,
    last_claim_event: Arc<Mutex<LastClaimEvent>>,
    batch_fees: Arc<Mutex<Vec<BatchFees>>>,
    query_error: Arc<Mutex<Option<OrchestratorError>>>,
    broadcast_results: Arc<Mutex<VecDeque<OrchestratorResult<BroadcastOutcome>>>>,
    broadcast_attempts: Arc<AtomicU64>,
    broadcasted: Arc<Mutex<Vec<PeggyMsg>>>,
}

impl Default for CosmosMockClient {
    fn default() -> Self {
        Self {
            orchestrator: "umee1orchestrator".to_string(),
            valsets: Default::default(),
            current_valset: Default::default(),
            valset_confirms: Default::default(),
            unsigned_valsets: Default::default(),
            unsigned_batch: Default::default(),
            batches: Default::default(),
            batch_confirms: Default::default(),
            last_claim_event: Default::default(),
            batch_fees: Default::default(),
            query_error: Default::default(),
            broadcast_results: Default::default(),
            broadcast_attempts: Arc::new(AtomicU64::new(0)),
            broadcasted: Default::default(),
        }
    }
}

impl CosmosMockClient {
    pub fn add_valset(&self, valset: Valset) {
        self.valsets.lock().unwrap().insert(valset.nonce, valset);
    }

    pub fn set_current_valset(&self, valset: Valset) {
        self.current_valset.lock().unwrap().replace(valset);
    }

    pub fn set_valset_confirms(&self, nonce: u64, confirms: Vec<ValsetConfirm>) {
        self.valset_confirms.lock().unwrap().insert(nonce, confirms);
    }

    pub fn set_unsigned_valsets(&self, valsets: Vec<Valset>) {
        *self.unsigned_valsets.lock().unwrap() = valsets;
    }

    pub fn set_unsigned_batch(&self, batch: Option<TransactionBatch>) {
        *self.unsigned_batch.lock().unwrap() = batch;
    }

    pub fn add_batch(&self, batch: TransactionBatch) {
        self.batches.lock().unwrap().push(batch);
    }

    pub fn set_batch_confirms(&self, nonce: u64, token: EthAddress, confirms: Vec<BatchConfirm>) {
        self.batch_confirms
            .lock()
            .unwrap()
            .insert((nonce, token), confirms);
    }

    pub fn set_last_claim_event(&self, event_nonce: u64, event_height: u64) {
        *self.last_claim_event.lock().unwrap() = LastClaimEvent {
            ethereum_event_nonce: event_nonce,
            ethereum_event_height: event_height,
        };
    }

    pub fn set_batch_fees(&self, fees: Vec<BatchFees>) {
        *self.batch_fees.lock().unwrap() = fees;
    }

    /// Makes every query fail with `error` until cleared with `None`.
    pub fn set_query_error(&self, error: Option<OrchestratorError>) {
        *self.query_error.lock().unwrap() = error;
    }

    /// Queues the result of the next broadcast. Once the queue is drained
    /// every broadcast commits.
    pub fn push_broadcast_result(&self, result: OrchestratorResult<BroadcastOutcome>) {
        self.broadcast_results.lock().unwrap().push_back(result);
    }

    pub fn broadcast_attempts(&self) -> u64 {
        self.broadcast_attempts.load(Ordering::SeqCst)
    }

    /// Messages of every broadcast that did not fail.
    pub fn broadcasted(&self) -> Vec<PeggyMsg> {
        self.broadcasted.lock().unwrap().clone()
    }

    fn check_query(&self) -> OrchestratorResult<()> {
        match self.query_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CosmosQueryClient for CosmosMockClient {
    async fn current_valset(&self) -> OrchestratorResult<Valset> {
        self.check_query()?;
        Ok(self.current_valset.lock().unwrap().clone().unwrap_or_default())
    }

    async fn valset_at_nonce(&self, nonce: u64) -> OrchestratorResult<Option<Valset>> {
        self.check_query()?;
        Ok(self.valsets.lock().unwrap().get(&nonce).cloned())
    }

    async fn latest_valsets(&self) -> OrchestratorResult<Vec<Valset>> {
        self.check_query()?;
        Ok(self.valsets.lock().unwrap().values().cloned().collect())
    }

    async fn valset_confirms(&self, nonce: u64) -> OrchestratorResult<Vec<ValsetConfirm>> {
        self.check_query()?;
        Ok(self
            .valset_confirms
            .lock()
            .unwrap()
            .get(&nonce)
            .cloned()
            .unwrap_or_default())
    }

    async fn oldest_unsigned_valsets(
        &self,
        _orchestrator: &str,
    ) -> OrchestratorResult<Vec<Valset>> {
        self.check_query()?;
        Ok(self.unsigned_valsets.lock().unwrap().clone())
    }

    async fn oldest_unsigned_batch(
        &self,
        _orchestrator: &str,
    ) -> OrchestratorResult<Option<TransactionBatch>> {
        self.check_query()?;
        Ok(self.unsigned_batch.lock().unwrap().clone())
    }

    async fn latest_batches(&self) -> OrchestratorResult<Vec<TransactionBatch>> {
        self.check_query()?;
        Ok(self.batches.lock().unwrap().clone())
    }

    async fn batch_confirms(
        &self,
        nonce: u64,
        token_contract: EthAddress,
    ) -> OrchestratorResult<Vec<BatchConfirm>> {
        self.check_query()?;
        Ok(self
            .batch_confirms
            .lock()
            .unwrap()
            .get(&(nonce, token_contract))
            .cloned()
            .unwrap_or_default())
    }

    async fn last_claim_event(&self, _orchestrator: &str) -> OrchestratorResult<LastClaimEvent> {
        self.check_query()?;
        Ok(self.last_claim_event.lock().unwrap().clone())
    }

    async fn batch_fees(&self) -> OrchestratorResult<Vec<BatchFees>> {
        self.check_query()?;
        Ok(self.batch_fees.lock().unwrap().clone())
    }
}

#[async_trait]
impl CosmosBroadcastClient for CosmosMockClient {
    fn orchestrator_address(&self) -> &str {
        &self.orchestrator
    }

    async fn broadcast(&self, msgs: Vec<PeggyMsg>) -> OrchestratorResult<BroadcastOutcome> {
        self.broadcast_attempts.fetch_add(1, Ordering::SeqCst);
        let result = self
            .broadcast_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(BroadcastOutcome::Committed {
                    tx_hash: format!("{:064X}", self.broadcast_attempts()),
                })
            });
        if result.is_ok() {
            self.broadcasted.lock().unwrap().extend(msgs);
        }
        result
    }
}
