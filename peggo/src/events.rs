// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Typed Peggy contract events.
//!
//! Every known event has its own decoder that checks the topic count, the static
//! head size and array agreement before anything is used. A log that carries a
//! known topic but fails any check is an error, never a silent skip.

use crate::abi::{
    erc20_deployed_topic, send_to_cosmos_topic, transaction_batch_executed_topic,
    valset_updated_topic,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{BridgeValidator, BridgeValidators, Valset};
use ethers::abi::{ParamType, Token};
use ethers::types::{Address as EthAddress, Log, TxHash, H256, U256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventCategory {
    ValsetUpdated,
    TransactionBatchExecuted,
    SendToCosmos,
    Erc20Deployed,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::ValsetUpdated,
        EventCategory::TransactionBatchExecuted,
        EventCategory::SendToCosmos,
        EventCategory::Erc20Deployed,
    ];

    pub fn topic(&self) -> H256 {
        match self {
            EventCategory::ValsetUpdated => valset_updated_topic(),
            EventCategory::TransactionBatchExecuted => transaction_batch_executed_topic(),
            EventCategory::SendToCosmos => send_to_cosmos_topic(),
            EventCategory::Erc20Deployed => erc20_deployed_topic(),
        }
    }

    pub fn from_topic(topic: &H256) -> Option<Self> {
        Self::ALL.into_iter().find(|c| &c.topic() == topic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::ValsetUpdated => "valset_updated",
            EventCategory::TransactionBatchExecuted => "batch_executed",
            EventCategory::SendToCosmos => "send_to_cosmos",
            EventCategory::Erc20Deployed => "erc20_deployed",
        }
    }
}

/// Position of an event on Ethereum plus the contract-assigned event nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventMeta {
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub event_nonce: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValsetUpdatedEvent {
    pub meta: EventMeta,
    pub new_valset_nonce: u64,
    pub reward_amount: U256,
    pub reward_token: EthAddress,
    pub validators: Vec<EthAddress>,
    pub powers: Vec<u64>,
}

impl ValsetUpdatedEvent {
    /// Members in the exact order the contract committed to.
    pub fn members(&self) -> BridgeValidators {
        BridgeValidators(
            self.validators
                .iter()
                .zip(self.powers.iter())
                .map(|(address, power)| BridgeValidator::new(*address, *power))
                .collect(),
        )
    }

    pub fn to_valset(&self) -> Valset {
        Valset {
            nonce: self.new_valset_nonce,
            members: self.members(),
            height: 0,
            reward_amount: self.reward_amount,
            reward_token: self.reward_token,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionBatchExecutedEvent {
    pub meta: EventMeta,
    pub batch_nonce: u64,
    pub token_contract: EthAddress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendToCosmosEvent {
    pub meta: EventMeta,
    pub token_contract: EthAddress,
    pub sender: EthAddress,
    pub destination: [u8; 32],
    pub amount: U256,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Erc20DeployedEvent {
    pub meta: EventMeta,
    pub cosmos_denom: String,
    pub token_contract: EthAddress,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeggyEvent {
    ValsetUpdated(ValsetUpdatedEvent),
    TransactionBatchExecuted(TransactionBatchExecutedEvent),
    SendToCosmos(SendToCosmosEvent),
    Erc20Deployed(Erc20DeployedEvent),
}

impl PeggyEvent {
    /// Decodes a raw log. Returns `Ok(None)` for logs that are not Peggy events.
    pub fn try_from_log(log: &Log) -> OrchestratorResult<Option<PeggyEvent>> {
        let Some(topic0) = log.topics.first() else {
            return Ok(None);
        };
        let Some(category) = EventCategory::from_topic(topic0) else {
            return Ok(None);
        };
        let event = match category {
            EventCategory::ValsetUpdated => PeggyEvent::ValsetUpdated(decode_valset_updated(log)?),
            EventCategory::TransactionBatchExecuted => {
                PeggyEvent::TransactionBatchExecuted(decode_batch_executed(log)?)
            }
            EventCategory::SendToCosmos => PeggyEvent::SendToCosmos(decode_send_to_cosmos(log)?),
            EventCategory::Erc20Deployed => {
                PeggyEvent::Erc20Deployed(decode_erc20_deployed(log)?)
            }
        };
        Ok(Some(event))
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            PeggyEvent::ValsetUpdated(e) => &e.meta,
            PeggyEvent::TransactionBatchExecuted(e) => &e.meta,
            PeggyEvent::SendToCosmos(e) => &e.meta,
            PeggyEvent::Erc20Deployed(e) => &e.meta,
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            PeggyEvent::ValsetUpdated(_) => EventCategory::ValsetUpdated,
            PeggyEvent::TransactionBatchExecuted(_) => EventCategory::TransactionBatchExecuted,
            PeggyEvent::SendToCosmos(_) => EventCategory::SendToCosmos,
            PeggyEvent::Erc20Deployed(_) => EventCategory::Erc20Deployed,
        }
    }

    pub fn event_nonce(&self) -> u64 {
        self.meta().event_nonce
    }
}

pub fn decode_valset_updated(log: &Log) -> OrchestratorResult<ValsetUpdatedEvent> {
    const NAME: &str = "ValsetUpdatedEvent";
    expect_topics(NAME, log, 2)?;
    let new_valset_nonce = topic_u64(NAME, "_newValsetNonce", &log.topics[1])?;
    let mut tokens = decode_data(
        NAME,
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Address,
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Uint(256))),
        ],
        &log.data,
    )?
    .into_iter();

    let event_nonce = to_u64(NAME, "_eventNonce", take_uint(NAME, tokens.next())?)?;
    let reward_amount = take_uint(NAME, tokens.next())?;
    let reward_token = take_address(NAME, tokens.next())?;
    let validators = take_array(NAME, tokens.next())?
        .into_iter()
        .map(|t| take_address(NAME, Some(t)))
        .collect::<OrchestratorResult<Vec<_>>>()?;
    let powers = take_array(NAME, tokens.next())?
        .into_iter()
        .map(|t| to_u64(NAME, "_powers", take_uint(NAME, Some(t))?))
        .collect::<OrchestratorResult<Vec<_>>>()?;
    if validators.len() != powers.len() {
        return Err(OrchestratorError::AbiDecodeError(format!(
            "{}: {} validators but {} powers",
            NAME,
            validators.len(),
            powers.len()
        )));
    }

    Ok(ValsetUpdatedEvent {
        meta: event_meta(NAME, log, event_nonce)?,
        new_valset_nonce,
        reward_amount,
        reward_token,
        validators,
        powers,
    })
}

pub fn decode_batch_executed(log: &Log) -> OrchestratorResult<TransactionBatchExecutedEvent> {
    const NAME: &str = "TransactionBatchExecutedEvent";
    expect_topics(NAME, log, 3)?;
    let batch_nonce = topic_u64(NAME, "_batchNonce", &log.topics[1])?;
    let token_contract = topic_address(NAME, "_token", &log.topics[2])?;
    let mut tokens = decode_data(NAME, &[ParamType::Uint(256)], &log.data)?.into_iter();
    let event_nonce = to_u64(NAME, "_eventNonce", take_uint(NAME, tokens.next())?)?;
    Ok(TransactionBatchExecutedEvent {
        meta: event_meta(NAME, log, event_nonce)?,
        batch_nonce,
        token_contract,
    })
}

pub fn decode_send_to_cosmos(log: &Log) -> OrchestratorResult<SendToCosmosEvent> {
    const NAME: &str = "SendToCosmosEvent";
    expect_topics(NAME, log, 4)?;
    let token_contract = topic_address(NAME, "_tokenContract", &log.topics[1])?;
    let sender = topic_address(NAME, "_sender", &log.topics[2])?;
    let destination = log.topics[3].to_fixed_bytes();
    let mut tokens = decode_data(
        NAME,
        &[ParamType::Uint(256), ParamType::Uint(256)],
        &log.data,
    )?
    .into_iter();
    let amount = take_uint(NAME, tokens.next())?;
    let event_nonce = to_u64(NAME, "_eventNonce", take_uint(NAME, tokens.next())?)?;
    Ok(SendToCosmosEvent {
        meta: event_meta(NAME, log, event_nonce)?,
        token_contract,
        sender,
        destination,
        amount,
    })
}

pub fn decode_erc20_deployed(log: &Log) -> OrchestratorResult<Erc20DeployedEvent> {
    const NAME: &str = "ERC20DeployedEvent";
    expect_topics(NAME, log, 2)?;
    let token_contract = topic_address(NAME, "_tokenContract", &log.topics[1])?;
    let mut tokens = decode_data(
        NAME,
        &[
            ParamType::String,
            ParamType::String,
            ParamType::String,
            ParamType::Uint(8),
            ParamType::Uint(256),
        ],
        &log.data,
    )?
    .into_iter();
    let cosmos_denom = take_string(NAME, tokens.next())?;
    let name = take_string(NAME, tokens.next())?;
    let symbol = take_string(NAME, tokens.next())?;
    let decimals = take_uint(NAME, tokens.next())?;
    if decimals > U256::from(u8::MAX) {
        return Err(decode_err(NAME, "_decimals does not fit in uint8"));
    }
    let event_nonce = to_u64(NAME, "_eventNonce", take_uint(NAME, tokens.next())?)?;
    Ok(Erc20DeployedEvent {
        meta: event_meta(NAME, log, event_nonce)?,
        cosmos_denom,
        token_contract,
        name,
        symbol,
        decimals: decimals.as_u32() as u8,
    })
}

fn decode_err(name: &str, msg: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::AbiDecodeError(format!("{}: {}", name, msg))
}

fn expect_topics(name: &str, log: &Log, expected: usize) -> OrchestratorResult<()> {
    if log.topics.len() != expected {
        return Err(decode_err(
            name,
            format!("expected {} topics, got {}", expected, log.topics.len()),
        ));
    }
    Ok(())
}

fn event_meta(name: &str, log: &Log, event_nonce: u64) -> OrchestratorResult<EventMeta> {
    let block_number = log
        .block_number
        .ok_or_else(|| decode_err(name, "log has no block number"))?
        .as_u64();
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| decode_err(name, "log has no transaction hash"))?;
    let log_index = log
        .log_index
        .ok_or_else(|| decode_err(name, "log has no log index"))?;
    Ok(EventMeta {
        block_number,
        tx_hash,
        log_index: to_u64(name, "logIndex", log_index)?,
        event_nonce,
    })
}

fn decode_data(name: &str, types: &[ParamType], data: &[u8]) -> OrchestratorResult<Vec<Token>> {
    let head = types.len() * 32;
    if data.len() < head {
        return Err(decode_err(
            name,
            format!("data is {} bytes, static head needs {}", data.len(), head),
        ));
    }
    let tokens = ethers::abi::decode(types, data).map_err(|e| decode_err(name, e))?;
    if tokens.len() != types.len() {
        return Err(decode_err(
            name,
            format!("decoded {} fields, expected {}", tokens.len(), types.len()),
        ));
    }
    Ok(tokens)
}

fn topic_u64(name: &str, field: &str, topic: &H256) -> OrchestratorResult<u64> {
    to_u64(name, field, U256::from_big_endian(topic.as_bytes()))
}

fn topic_address(name: &str, field: &str, topic: &H256) -> OrchestratorResult<EthAddress> {
    let bytes = topic.as_bytes();
    if bytes[..12].iter().any(|b| *b != 0) {
        return Err(decode_err(name, format!("{} is not a left-padded address", field)));
    }
    Ok(EthAddress::from_slice(&bytes[12..]))
}

fn to_u64(name: &str, field: &str, value: U256) -> OrchestratorResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(decode_err(name, format!("{} overflows u64: {}", field, value)));
    }
    Ok(value.as_u64())
}

fn take_uint(name: &str, token: Option<Token>) -> OrchestratorResult<U256> {
    match token {
        Some(Token::Uint(v)) => Ok(v),
        other => Err(decode_err(name, format!("expected uint, got {:?}", other))),
    }
}

fn take_address(name: &str, token: Option<Token>) -> OrchestratorResult<EthAddress> {
    match token {
        Some(Token::Address(a)) => Ok(a),
        other => Err(decode_err(name, format!("expected address, got {:?}", other))),
    }
}

fn take_string(name: &str, token: Option<Token>) -> OrchestratorResult<String> {
    match token {
        Some(Token::String(s)) => Ok(s),
        other => Err(decode_err(name, format!("expected string, got {:?}", other))),
    }
}

fn take_array(name: &str, token: Option<Token>) -> OrchestratorResult<Vec<Token>> {
    match token {
        Some(Token::Array(items)) => Ok(items),
        other => Err(decode_err(name, format!("expected array, got {:?}", other))),
    }
}
