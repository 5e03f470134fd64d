// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::providers::ProviderError as EthersProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    // Transient Ethereum provider error (timeouts, connection resets, rate limits)
    TransientProviderError(String),
    // Ethereum provider error
    ProviderError(String),
    // A log of a known event category could not be decoded
    AbiDecodeError(String),
    // No ValsetUpdatedEvent matches the nonce the Peggy contract trusts
    ValsetNotFound {
        nonce: u64,
        from_block: u64,
        to_block: u64,
    },
    // A validator set failed validation (duplicate members, mismatched arrays)
    InvalidValset(String),
    // The update was already relayed by another orchestrator
    AlreadyRelayed(String),
    // The source chain already holds this claim or confirmation
    DuplicateClaim(String),
    // Transient Cosmos error (sequence mismatch, mempool full, timeouts)
    TransientCosmosError(String),
    // Cosmos query or broadcast error
    CosmosError(String),
    // Signing a checkpoint or transaction failed
    SignerError(String),
    // An RPC call did not complete in time
    Timeout(String),
    // Invalid configuration
    ConfigError(String),
    // Uncategorized error
    Generic(String),
}

impl OrchestratorError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            OrchestratorError::TransientProviderError(_) => "transient_provider_error",
            OrchestratorError::ProviderError(_) => "provider_error",
            OrchestratorError::AbiDecodeError(_) => "abi_decode_error",
            OrchestratorError::ValsetNotFound { .. } => "valset_not_found",
            OrchestratorError::InvalidValset(_) => "invalid_valset",
            OrchestratorError::AlreadyRelayed(_) => "already_relayed",
            OrchestratorError::DuplicateClaim(_) => "duplicate_claim",
            OrchestratorError::TransientCosmosError(_) => "transient_cosmos_error",
            OrchestratorError::CosmosError(_) => "cosmos_error",
            OrchestratorError::SignerError(_) => "signer_error",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::ConfigError(_) => "config_error",
            OrchestratorError::Generic(_) => "generic",
        }
    }

    /// Faults worth retrying with backoff at the call site.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TransientProviderError(_)
                | OrchestratorError::TransientCosmosError(_)
                | OrchestratorError::Timeout(_)
        )
    }

    /// Another orchestrator won the race; the caller treats this as success.
    pub fn is_expected_race(&self) -> bool {
        matches!(
            self,
            OrchestratorError::AlreadyRelayed(_) | OrchestratorError::DuplicateClaim(_)
        )
    }
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::ValsetNotFound {
                nonce,
                from_block,
                to_block,
            } => write!(
                f,
                "no ValsetUpdatedEvent with nonce {} in blocks [{}, {}]",
                nonce, from_block, to_block
            ),
            other => write!(f, "{:?}", other),
        }
    }
}

impl std::error::Error for OrchestratorError {}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<EthersProviderError> for OrchestratorError {
    fn from(e: EthersProviderError) -> Self {
        match &e {
            EthersProviderError::JsonRpcClientError(inner) => {
                // Node-side JSON-RPC errors are definitive answers, transport errors are not.
                if inner.as_error_response().is_some() {
                    OrchestratorError::ProviderError(e.to_string())
                } else {
                    OrchestratorError::TransientProviderError(e.to_string())
                }
            }
            EthersProviderError::HTTPError(_) => {
                OrchestratorError::TransientProviderError(e.to_string())
            }
            _ => OrchestratorError::ProviderError(e.to_string()),
        }
    }
}

/// Classifies the message of a failed Peggy transaction.
pub fn classify_eth_submit_error(message: String) -> OrchestratorError {
    let lower = message.to_lowercase();
    if lower.contains("nonce must be greater")
        || lower.contains("new batch nonce must be greater")
        || lower.contains("already known")
    {
        OrchestratorError::AlreadyRelayed(message)
    } else if lower.contains("nonce too low")
        || lower.contains("replacement transaction underpriced")
        || lower.contains("timeout")
        || lower.contains("connection")
    {
        OrchestratorError::TransientProviderError(message)
    } else {
        OrchestratorError::ProviderError(message)
    }
}
