// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{Peggy, ValsetArgs};
use crate::checkpoint::signature_parts;
use crate::error::{classify_eth_submit_error, OrchestratorError, OrchestratorResult};
use crate::metered_eth_provider::MeteredEthHttpProvider;
use crate::types::{TransactionBatch, Valset};
use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::middleware::{NonceManagerMiddleware, SignerMiddleware};
use ethers::providers::{Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address as EthAddress, Signature, TransactionReceipt, TxHash, U256, U64};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub type EthSignerClient =
    NonceManagerMiddleware<SignerMiddleware<Provider<MeteredEthHttpProvider>, LocalWallet>>;

/// Signatures laid out positionally over the trusted valset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignatureSet {
    pub v: Vec<u8>,
    pub r: Vec<[u8; 32]>,
    pub s: Vec<[u8; 32]>,
    /// Power of the members that signed.
    pub confirmed_power: u64,
}

impl SignatureSet {
    /// Members without a signature get `v = 0` and zero `r`/`s`, which the
    /// contract skips.
    pub fn arrange(trusted: &Valset, signatures: &HashMap<EthAddress, Signature>) -> Self {
        let mut set = SignatureSet::default();
        for member in trusted.members.iter() {
            match signatures.get(&member.ethereum_address) {
                Some(signature) => {
                    let (v, r, s) = signature_parts(signature);
                    set.v.push(v);
                    set.r.push(r);
                    set.s.push(s);
                    set.confirmed_power = set.confirmed_power.saturating_add(member.power);
                }
                None => {
                    set.v.push(0);
                    set.r.push([0u8; 32]);
                    set.s.push([0u8; 32]);
                }
            }
        }
        set
    }

    pub fn signer_count(&self) -> usize {
        self.v.iter().filter(|v| **v != 0).count()
    }
}

pub fn valset_args(valset: &Valset) -> ValsetArgs {
    ValsetArgs {
        validators: valset.members.addresses(),
        powers: valset
            .members
            .get_powers()
            .into_iter()
            .map(U256::from)
            .collect(),
        valset_nonce: U256::from(valset.nonce),
        reward_amount: valset.reward_amount,
        reward_token: valset.reward_token,
    }
}

/// Writes to the Peggy contract.
#[async_trait]
pub trait PeggySubmitter: Send + Sync {
    async fn update_valset(
        &self,
        new_valset: &Valset,
        current_valset: &Valset,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<TxHash>;

    /// Estimated cost of `submit_batch` in wei (gas times current gas price).
    async fn estimate_submit_batch_cost(
        &self,
        current_valset: &Valset,
        batch: &TransactionBatch,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<U256>;

    async fn submit_batch(
        &self,
        current_valset: &Valset,
        batch: &TransactionBatch,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<TxHash>;
}

fn submit_error<M: Middleware>(e: ContractError<M>) -> OrchestratorError {
    match e.decode_revert::<String>() {
        Some(reason) => classify_eth_submit_error(format!("execution reverted: {}", reason)),
        None => classify_eth_submit_error(e.to_string()),
    }
}

fn check_receipt(what: &str, receipt: Option<TransactionReceipt>) -> OrchestratorResult<TxHash> {
    let receipt = receipt.ok_or_else(|| {
        OrchestratorError::TransientProviderError(format!("{} dropped from mempool", what))
    })?;
    if receipt.status != Some(U64::from(1)) {
        return Err(OrchestratorError::ProviderError(format!(
            "{} tx {:?} failed with status {:?}",
            what, receipt.transaction_hash, receipt.status
        )));
    }
    info!(
        "{} tx {:?} included in block {:?}",
        what, receipt.transaction_hash, receipt.block_number
    );
    Ok(receipt.transaction_hash)
}

pub struct EthPeggySubmitter<M> {
    peggy: Peggy<M>,
}

impl EthPeggySubmitter<EthSignerClient> {
    pub fn new(
        provider: Arc<Provider<MeteredEthHttpProvider>>,
        wallet: LocalWallet,
        peggy_address: EthAddress,
    ) -> Self {
        let sender = wallet.address();
        let signer = SignerMiddleware::new(provider.as_ref().clone(), wallet);
        let client = NonceManagerMiddleware::new(signer, sender);
        Self {
            peggy: Peggy::new(peggy_address, Arc::new(client)),
        }
    }
}

impl<M: Middleware + 'static> EthPeggySubmitter<M> {
    fn batch_call(
        &self,
        current_valset: &Valset,
        batch: &TransactionBatch,
        signatures: &SignatureSet,
    ) -> ethers::contract::builders::ContractCall<M, ()> {
        let amounts = batch
            .transactions
            .iter()
            .map(|tx| tx.erc20_token.amount)
            .collect();
        let destinations = batch.transactions.iter().map(|tx| tx.dest_address).collect();
        let fees = batch
            .transactions
            .iter()
            .map(|tx| tx.erc20_fee.amount)
            .collect();
        self.peggy.submit_batch(
            valset_args(current_valset),
            signatures.v.clone(),
            signatures.r.clone(),
            signatures.s.clone(),
            amounts,
            destinations,
            fees,
            U256::from(batch.batch_nonce),
            batch.token_contract,
            U256::from(batch.batch_timeout),
        )
    }
}

#[async_trait]
impl<M: Middleware + 'static> PeggySubmitter for EthPeggySubmitter<M> {
    async fn update_valset(
        &self,
        new_valset: &Valset,
        current_valset: &Valset,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<TxHash> {
        let call = self.peggy.update_valset(
            valset_args(new_valset),
            valset_args(current_valset),
            signatures.v.clone(),
            signatures.r.clone(),
            signatures.s.clone(),
        );
        let pending = call.send().await.map_err(submit_error)?;
        info!(
            "Sent updateValset {} -> {}: {:?}",
            current_valset.nonce,
            new_valset.nonce,
            pending.tx_hash()
        );
        check_receipt("updateValset", pending.await?)
    }

    async fn estimate_submit_batch_cost(
        &self,
        current_valset: &Valset,
        batch: &TransactionBatch,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<U256> {
        let gas = self
            .batch_call(current_valset, batch, signatures)
            .estimate_gas()
            .await
            .map_err(submit_error)?;
        let gas_price = self
            .peggy
            .client()
            .get_gas_price()
            .await
            .map_err(|e| classify_eth_submit_error(e.to_string()))?;
        Ok(gas.saturating_mul(gas_price))
    }

    async fn submit_batch(
        &self,
        current_valset: &Valset,
        batch: &TransactionBatch,
        signatures: &SignatureSet,
    ) -> OrchestratorResult<TxHash> {
        let call = self.batch_call(current_valset, batch, signatures);
        let pending = call.send().await.map_err(submit_error)?;
        info!(
            "Sent submitBatch nonce {} token {:?}: {:?}",
            batch.batch_nonce,
            batch.token_contract,
            pending.tx_hash()
        );
        check_receipt("submitBatch", pending.await?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{sign_checkpoint, valset_checkpoint};
    use crate::test_utils::{test_wallets, valset_of_wallets};
    use ethers::types::H256;

    #[test]
    fn test_arrange_signatures_positionally() {
        let wallets = test_wallets(3);
        let trusted = valset_of_wallets(1, &wallets, &[30, 20, 10]);
        let checkpoint = valset_checkpoint(H256::zero(), &trusted);

        // Only the 10-power member and the 30-power member sign.
        let mut signatures = HashMap::new();
        for wallet in [&wallets[0], &wallets[2]] {
            signatures.insert(
                wallet.address(),
                sign_checkpoint(wallet, checkpoint).unwrap(),
            );
        }
        let set = SignatureSet::arrange(&trusted, &signatures);
        assert_eq!(set.v.len(), 3);
        assert_eq!(set.confirmed_power, 40);
        assert_eq!(set.signer_count(), 2);

        let missing = trusted
            .members
            .iter()
            .position(|m| m.ethereum_address == wallets[1].address())
            .unwrap();
        assert_eq!(set.v[missing], 0);
        assert_eq!(set.r[missing], [0u8; 32]);
        assert_eq!(set.s[missing], [0u8; 32]);
    }

    #[test]
    fn test_valset_args_preserve_member_order() {
        let wallets = test_wallets(2);
        let valset = valset_of_wallets(9, &wallets, &[5, 7]);
        let args = valset_args(&valset);
        assert_eq!(args.validators, valset.members.addresses());
        assert_eq!(args.powers, vec![U256::from(7), U256::from(5)]);
        assert_eq!(args.valset_nonce, U256::from(9));
    }

    #[test]
    fn test_check_receipt() {
        let ok = TransactionReceipt {
            status: Some(U64::from(1)),
            ..Default::default()
        };
        assert!(check_receipt("submitBatch", Some(ok)).is_ok());
        let failed = TransactionReceipt {
            status: Some(U64::zero()),
            ..Default::default()
        };
        assert_eq!(
            check_receipt("submitBatch", Some(failed))
                .unwrap_err()
                .error_type(),
            "provider_error"
        );
        assert!(check_receipt("submitBatch", None)
            .unwrap_err()
            .is_transient());
    }
}
