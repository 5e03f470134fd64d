// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::{OrchestratorError, OrchestratorResult};
use ethers::types::{Address as EthAddress, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::{HashMap, HashSet};

/// Cosmos encodes `sdk.Int` as a decimal string, `U256` defaults to hex.
pub mod decimal_u256 {
    use ethers::types::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(U256::zero());
        }
        U256::from_dec_str(&s).map_err(D::Error::custom)
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeValidator {
    #[serde_as(as = "DisplayFromStr")]
    pub power: u64,
    pub ethereum_address: EthAddress,
}

impl BridgeValidator {
    pub fn new(ethereum_address: EthAddress, power: u64) -> Self {
        Self {
            power,
            ethereum_address,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeValidators(pub Vec<BridgeValidator>);

impl BridgeValidators {
    /// Orders members by descending power, breaking ties by ascending address bytes.
    /// This is the order the Peggy contract commits to.
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| {
            b.power
                .cmp(&a.power)
                .then_with(|| a.ethereum_address.as_bytes().cmp(b.ethereum_address.as_bytes()))
        });
    }

    pub fn sorted(mut self) -> Self {
        self.sort();
        self
    }

    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.0.len());
        self.0.iter().any(|v| !seen.insert(v.ethereum_address))
    }

    pub fn get_powers(&self) -> Vec<u64> {
        self.0.iter().map(|v| v.power).collect()
    }

    pub fn addresses(&self) -> Vec<EthAddress> {
        self.0.iter().map(|v| v.ethereum_address).collect()
    }

    pub fn total_power(&self) -> u64 {
        let total: u128 = self.0.iter().map(|v| v.power as u128).sum();
        u64::try_from(total).unwrap_or(u64::MAX)
    }

    pub fn power_of(&self, address: &EthAddress) -> u64 {
        self.0
            .iter()
            .filter(|v| &v.ethereum_address == address)
            .map(|v| v.power)
            .sum()
    }

    /// Sum of per-address power deltas over the union of both sets, relative to
    /// the total power of `self`. Zero for an empty `self`.
    pub fn power_diff(&self, other: &BridgeValidators) -> f64 {
        let total = self.total_power();
        if total == 0 {
            return 0.0;
        }
        let mut powers: HashMap<EthAddress, i128> = HashMap::new();
        for v in &self.0 {
            *powers.entry(v.ethereum_address).or_default() += v.power as i128;
        }
        for v in &other.0 {
            *powers.entry(v.ethereum_address).or_default() -= v.power as i128;
        }
        let delta: f64 = powers.values().map(|p| p.unsigned_abs() as f64).sum();
        (delta / total as f64).abs()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BridgeValidator> {
        self.0.iter()
    }
}

impl From<Vec<BridgeValidator>> for BridgeValidators {
    fn from(members: Vec<BridgeValidator>) -> Self {
        Self(members)
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Valset {
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    pub members: BridgeValidators,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub height: u64,
    #[serde(with = "decimal_u256", default)]
    pub reward_amount: U256,
    #[serde(default)]
    pub reward_token: EthAddress,
}

impl Valset {
    /// The zero-value set: nonce 0 and no members.
    pub fn is_trivial(&self) -> bool {
        self.nonce == 0 && self.members.is_empty()
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.members.has_duplicates() {
            return Err(OrchestratorError::InvalidValset(format!(
                "valset {} contains duplicate ethereum addresses",
                self.nonce
            )));
        }
        Ok(())
    }

    /// Same membership and powers, regardless of member order.
    pub fn same_members(&self, other: &Valset) -> bool {
        self.members.clone().sorted() == other.members.clone().sorted()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Erc20Token {
    pub contract: EthAddress,
    #[serde(with = "decimal_u256")]
    pub amount: U256,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingTransferTx {
    #[serde_as(as = "DisplayFromStr")]
    pub id: u64,
    pub sender: String,
    pub dest_address: EthAddress,
    pub erc20_token: Erc20Token,
    pub erc20_fee: Erc20Token,
}

/// An outgoing batch the Peggy contract is waiting to execute.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBatch {
    #[serde_as(as = "DisplayFromStr")]
    pub batch_nonce: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub batch_timeout: u64,
    #[serde(default)]
    pub transactions: Vec<OutgoingTransferTx>,
    pub token_contract: EthAddress,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub block: u64,
}

impl TransactionBatch {
    /// Total relayer fee paid by the batch, in units of the batch token.
    pub fn fee_total(&self) -> U256 {
        self.transactions
            .iter()
            .fold(U256::zero(), |acc, tx| acc.saturating_add(tx.erc20_fee.amount))
    }

    pub fn is_timed_out(&self, eth_height: u64) -> bool {
        self.batch_timeout != 0 && self.batch_timeout <= eth_height
    }
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValsetConfirm {
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    pub orchestrator: String,
    pub eth_address: EthAddress,
    pub signature: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfirm {
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    pub token_contract: EthAddress,
    pub eth_signer: EthAddress,
    pub orchestrator: String,
    pub signature: String,
}

/// An orchestrator's signature over a valset or batch checkpoint.
pub trait Confirmation {
    fn eth_signer(&self) -> EthAddress;
    fn signature_hex(&self) -> &str;
}

impl Confirmation for ValsetConfirm {
    fn eth_signer(&self) -> EthAddress {
        self.eth_address
    }

    fn signature_hex(&self) -> &str {
        &self.signature
    }
}

impl Confirmation for BatchConfirm {
    fn eth_signer(&self) -> EthAddress {
        self.eth_signer
    }

    fn signature_hex(&self) -> &str {
        &self.signature
    }
}

/// Last Ethereum event this orchestrator attested to on the source chain.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastClaimEvent {
    #[serde_as(as = "DisplayFromStr")]
    pub ethereum_event_nonce: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub ethereum_event_height: u64,
}

/// Unbatched fees waiting on the source chain for one token.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFees {
    pub token: EthAddress,
    #[serde(with = "decimal_u256")]
    pub total_fees: U256,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub tx_count: u64,
}

/// Fraction of total power a confirmation set must reach, in parts per million.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowerThreshold {
    parts_per_million: u64,
}

impl PowerThreshold {
    pub const PRECISION: u64 = 1_000_000;

    pub fn from_fraction(fraction: f64) -> OrchestratorResult<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(OrchestratorError::ConfigError(format!(
                "consensus threshold must be in (0, 1], got {}",
                fraction
            )));
        }
        Ok(Self {
            parts_per_million: (fraction * Self::PRECISION as f64).round() as u64,
        })
    }

    pub fn parts_per_million(&self) -> u64 {
        self.parts_per_million
    }

    pub fn is_met(&self, confirmed_power: u64, total_power: u64) -> bool {
        if total_power == 0 {
            return false;
        }
        confirmed_power as u128 * Self::PRECISION as u128
            >= total_power as u128 * self.parts_per_million as u128
    }
}
