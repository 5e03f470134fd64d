// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::abigen;
use ethers::types::H256;
use ethers::utils::keccak256;

// Peggy contract surface used by the orchestrator. Events are decoded by hand in
// `events.rs`, so only calls are bound here.
abigen!(
    Peggy,
    r#"[
        struct ValsetArgs { address[] validators; uint256[] powers; uint256 valsetNonce; uint256 rewardAmount; address rewardToken; }
        function state_peggyId() view returns (bytes32)
        function state_lastValsetNonce() view returns (uint256)
        function state_lastValsetCheckpoint() view returns (bytes32)
        function state_lastEventNonce() view returns (uint256)
        function state_lastBatchNonces(address) view returns (uint256)
        function updateValset(ValsetArgs _newValset, ValsetArgs _currentValset, uint8[] _v, bytes32[] _r, bytes32[] _s)
        function submitBatch(ValsetArgs _currentValset, uint8[] _v, bytes32[] _r, bytes32[] _s, uint256[] _amounts, address[] _destinations, uint256[] _fees, uint256 _batchNonce, address _tokenContract, uint256 _batchTimeout)
    ]"#
);

pub const VALSET_UPDATED_EVENT_SIG: &str =
    "ValsetUpdatedEvent(uint256,uint256,uint256,address,address[],uint256[])";
pub const TRANSACTION_BATCH_EXECUTED_EVENT_SIG: &str =
    "TransactionBatchExecutedEvent(uint256,address,uint256)";
pub const SEND_TO_COSMOS_EVENT_SIG: &str =
    "SendToCosmosEvent(address,address,bytes32,uint256,uint256)";
pub const ERC20_DEPLOYED_EVENT_SIG: &str =
    "ERC20DeployedEvent(string,address,string,string,uint8,uint256)";

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

pub fn valset_updated_topic() -> H256 {
    event_topic(VALSET_UPDATED_EVENT_SIG)
}

pub fn transaction_batch_executed_topic() -> H256 {
    event_topic(TRANSACTION_BATCH_EXECUTED_EVENT_SIG)
}

pub fn send_to_cosmos_topic() -> H256 {
    event_topic(SEND_TO_COSMOS_EVENT_SIG)
}

pub fn erc20_deployed_topic() -> H256 {
    event_topic(ERC20_DEPLOYED_EVENT_SIG)
}
