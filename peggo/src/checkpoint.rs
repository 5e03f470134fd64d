// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Checkpoints the Peggy contract verifies signatures against.
//!
//! Both checkpoints are `keccak256(abi.encode(...))` with the peggy id and a
//! method name as domain separators. Orchestrators sign them as EIP-191
//! personal messages.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{TransactionBatch, Valset};
use ethers::abi::Token;
use ethers::signers::LocalWallet;
use ethers::types::{Address as EthAddress, Signature, H256, U256};
use ethers::utils::{hash_message, keccak256};
use std::str::FromStr;

const VALSET_METHOD_NAME: &str = "checkpoint";
const BATCH_METHOD_NAME: &str = "transactionBatch";

fn method_name_token(name: &str) -> Token {
    let mut bytes = [0u8; 32];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    Token::FixedBytes(bytes.to_vec())
}

fn uint_array(values: impl Iterator<Item = U256>) -> Token {
    Token::Array(values.map(Token::Uint).collect())
}

pub fn valset_checkpoint(peggy_id: H256, valset: &Valset) -> H256 {
    let encoded = ethers::abi::encode(&[
        Token::FixedBytes(peggy_id.as_bytes().to_vec()),
        method_name_token(VALSET_METHOD_NAME),
        Token::Uint(U256::from(valset.nonce)),
        Token::Array(
            valset
                .members
                .iter()
                .map(|m| Token::Address(m.ethereum_address))
                .collect(),
        ),
        uint_array(valset.members.iter().map(|m| U256::from(m.power))),
        Token::Uint(valset.reward_amount),
        Token::Address(valset.reward_token),
    ]);
    H256::from(keccak256(encoded))
}

pub fn batch_checkpoint(peggy_id: H256, batch: &TransactionBatch) -> H256 {
    let encoded = ethers::abi::encode(&[
        Token::FixedBytes(peggy_id.as_bytes().to_vec()),
        method_name_token(BATCH_METHOD_NAME),
        uint_array(batch.transactions.iter().map(|tx| tx.erc20_token.amount)),
        Token::Array(
            batch
                .transactions
                .iter()
                .map(|tx| Token::Address(tx.dest_address))
                .collect(),
        ),
        uint_array(batch.transactions.iter().map(|tx| tx.erc20_fee.amount)),
        Token::Uint(U256::from(batch.batch_nonce)),
        Token::Address(batch.token_contract),
        Token::Uint(U256::from(batch.batch_timeout)),
    ]);
    H256::from(keccak256(encoded))
}

pub fn sign_checkpoint(wallet: &LocalWallet, checkpoint: H256) -> OrchestratorResult<Signature> {
    wallet
        .sign_hash(hash_message(checkpoint.as_bytes()))
        .map_err(|e| OrchestratorError::SignerError(format!("{:?}", e)))
}

/// Accepts 65 byte hex with or without a `0x` prefix.
pub fn parse_signature(signature_hex: &str) -> OrchestratorResult<Signature> {
    Signature::from_str(signature_hex.trim()).map_err(|e| {
        OrchestratorError::SignerError(format!("malformed signature {}: {:?}", signature_hex, e))
    })
}

/// Recovers the Ethereum address behind a hex signature over `checkpoint`.
pub fn recover_signer(signature_hex: &str, checkpoint: H256) -> OrchestratorResult<EthAddress> {
    recover_signature(&parse_signature(signature_hex)?, checkpoint)
}

pub fn recover_signature(signature: &Signature, checkpoint: H256) -> OrchestratorResult<EthAddress> {
    signature
        .recover(checkpoint.as_bytes())
        .map_err(|e| OrchestratorError::SignerError(format!("recovery failed: {:?}", e)))
}

/// 65 byte `r || s || v` hex, without a `0x` prefix.
pub fn encode_signature(signature: &Signature) -> String {
    hex::encode(signature.to_vec())
}

/// Splits a signature into the `(v, r, s)` triple the contract takes.
pub fn signature_parts(signature: &Signature) -> (u8, [u8; 32], [u8; 32]) {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    signature.r.to_big_endian(&mut r);
    signature.s.to_big_endian(&mut s);
    (signature.v as u8, r, s)
}
