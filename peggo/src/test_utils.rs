// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::abi::{
    erc20_deployed_topic, send_to_cosmos_topic, transaction_batch_executed_topic,
    valset_updated_topic,
};
use crate::eth_mock_provider::EthMockProvider;
use crate::scanner::nonce_topic;
use crate::types::{BridgeValidator, BridgeValidators, Valset};
use ethers::abi::Token;
use ethers::signers::LocalWallet;
use ethers::types::{Address as EthAddress, Bytes, Filter, Log, TxHash, H256, U256, U64};
use std::sync::Once;

/// `ValsetUpdatedEvent` data captured from a live Peggy deployment: one member.
pub const VALSET_UPDATED_1_MEMBER: &str = include_str!("../test_data/valset_updated_1_member.hex");
/// `ValsetUpdatedEvent` data captured from a live Peggy deployment: 99 members.
pub const VALSET_UPDATED_99_MEMBERS: &str =
    include_str!("../test_data/valset_updated_99_members.hex");

pub fn init_for_testing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn address_topic(address: EthAddress) -> H256 {
    H256::from(address)
}

fn log_with(
    contract: EthAddress,
    topics: Vec<H256>,
    data: Vec<u8>,
    block_number: u64,
    log_index: u64,
) -> Log {
    Log {
        address: contract,
        topics,
        data: Bytes::from(data),
        block_hash: Some(H256::random()),
        block_number: Some(U64::from(block_number)),
        transaction_hash: Some(TxHash::random()),
        transaction_index: Some(U64::zero()),
        log_index: Some(U256::from(log_index)),
        removed: Some(false),
        ..Default::default()
    }
}

pub fn valset_updated_log(
    contract: EthAddress,
    valset_nonce: u64,
    event_nonce: u64,
    validators: Vec<EthAddress>,
    powers: Vec<u64>,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = ethers::abi::encode(&[
        Token::Uint(U256::from(event_nonce)),
        Token::Uint(U256::zero()),
        Token::Address(EthAddress::zero()),
        Token::Array(validators.into_iter().map(Token::Address).collect()),
        Token::Array(
            powers
                .into_iter()
                .map(|p| Token::Uint(U256::from(p)))
                .collect(),
        ),
    ]);
    log_with(
        contract,
        vec![valset_updated_topic(), nonce_topic(valset_nonce)],
        data,
        block_number,
        log_index,
    )
}

pub fn valset_updated_log_for(
    contract: EthAddress,
    valset: &Valset,
    event_nonce: u64,
    block_number: u64,
) -> Log {
    valset_updated_log(
        contract,
        valset.nonce,
        event_nonce,
        valset.members.addresses(),
        valset.members.get_powers(),
        block_number,
        0,
    )
}

/// Builds a log around a captured data payload; topic1 carries `valset_nonce`.
pub fn valset_updated_log_from_fixture(
    contract: EthAddress,
    valset_nonce: u64,
    fixture: &str,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = hex::decode(fixture.trim().trim_start_matches("0x")).unwrap();
    log_with(
        contract,
        vec![valset_updated_topic(), nonce_topic(valset_nonce)],
        data,
        block_number,
        log_index,
    )
}

pub fn batch_executed_log(
    contract: EthAddress,
    batch_nonce: u64,
    token: EthAddress,
    event_nonce: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = ethers::abi::encode(&[Token::Uint(U256::from(event_nonce))]);
    log_with(
        contract,
        vec![
            transaction_batch_executed_topic(),
            nonce_topic(batch_nonce),
            address_topic(token),
        ],
        data,
        block_number,
        log_index,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn send_to_cosmos_log(
    contract: EthAddress,
    token: EthAddress,
    sender: EthAddress,
    destination: [u8; 32],
    amount: U256,
    event_nonce: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = ethers::abi::encode(&[Token::Uint(amount), Token::Uint(U256::from(event_nonce))]);
    log_with(
        contract,
        vec![
            send_to_cosmos_topic(),
            address_topic(token),
            address_topic(sender),
            H256::from(destination),
        ],
        data,
        block_number,
        log_index,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn erc20_deployed_log(
    contract: EthAddress,
    token: EthAddress,
    cosmos_denom: &str,
    name: &str,
    symbol: &str,
    decimals: u8,
    event_nonce: u64,
    block_number: u64,
    log_index: u64,
) -> Log {
    let data = ethers::abi::encode(&[
        Token::String(cosmos_denom.to_string()),
        Token::String(name.to_string()),
        Token::String(symbol.to_string()),
        Token::Uint(U256::from(decimals)),
        Token::Uint(U256::from(event_nonce)),
    ]);
    log_with(
        contract,
        vec![erc20_deployed_topic(), address_topic(token)],
        data,
        block_number,
        log_index,
    )
}

pub fn mock_latest_block(mock_provider: &EthMockProvider, block_number: u64) {
    mock_provider
        .add_response("eth_blockNumber", (), U64::from(block_number))
        .unwrap();
}

/// Answers every `eth_call` with one ABI-encoded uint256.
pub fn mock_eth_call_uint(mock_provider: &EthMockProvider, value: u64) {
    let encoded = ethers::abi::encode(&[Token::Uint(U256::from(value))]);
    mock_provider
        .add_wildcard_response("eth_call", Bytes::from(encoded))
        .unwrap();
}

pub fn mock_logs(mock_provider: &EthMockProvider, filter: &Filter, logs: Vec<Log>) {
    mock_provider
        .add_response("eth_getLogs", [filter], logs)
        .unwrap();
}

pub fn test_wallets(count: usize) -> Vec<LocalWallet> {
    (1..=count)
        .map(|i| {
            let mut key = [0u8; 32];
            key[24..].copy_from_slice(&(i as u64 + 1000).to_be_bytes());
            LocalWallet::from_bytes(&key).unwrap()
        })
        .collect()
}

/// A valset whose members are the given wallets, each with `power`.
pub fn valset_of_wallets(nonce: u64, wallets: &[LocalWallet], powers: &[u64]) -> Valset {
    use ethers::signers::Signer;
    let members = wallets
        .iter()
        .zip(powers.iter())
        .map(|(w, p)| BridgeValidator::new(w.address(), *p))
        .collect::<Vec<_>>();
    Valset {
        nonce,
        members: BridgeValidators(members).sorted(),
        height: nonce * 10,
        ..Default::default()
    }
}
