// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory JSON-RPC transport for driving `Provider<EthMockProvider>` in tests.

use async_trait::async_trait;
use ethers::providers::{JsonRpcClient, MockError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};

/// Responses are keyed by method and the serialized params, with an optional
/// per-method fallback for calls whose params are awkward to reproduce.
#[derive(Clone, Debug, Default)]
pub struct EthMockProvider {
    responses: Arc<Mutex<HashMap<(String, String), Value>>>,
    wildcard_responses: Arc<Mutex<HashMap<String, Value>>>,
    requests: Arc<Mutex<Vec<(String, String)>>>,
}

impl EthMockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<P: Serialize, R: Serialize>(
        &self,
        method: &str,
        params: P,
        response: R,
    ) -> Result<(), MockError> {
        let params = serde_json::to_string(&params)?;
        let response = serde_json::to_value(response)?;
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), params), response);
        Ok(())
    }

    pub fn add_wildcard_response<R: Serialize>(
        &self,
        method: &str,
        response: R,
    ) -> Result<(), MockError> {
        let response = serde_json::to_value(response)?;
        self.wildcard_responses
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
        Ok(())
    }

    /// Every request seen so far, as (method, serialized params).
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }
}

#[async_trait]
impl JsonRpcClient for EthMockProvider {
    type Error = MockError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, MockError> {
        let params = serde_json::to_string(&params)?;
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&(method.to_string(), params))
            .cloned()
            .or_else(|| self.wildcard_responses.lock().unwrap().get(method).cloned())
            .ok_or(MockError::EmptyResponses)?;
        Ok(serde_json::from_value(response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{Middleware, Provider};
    use ethers::types::U64;

    #[tokio::test]
    async fn test_mock_provider_answers_registered_calls_only() {
        let mock = EthMockProvider::new();
        mock.add_response("eth_blockNumber", (), U64::from(42)).unwrap();
        let provider = Provider::new(mock.clone());

        assert_eq!(provider.get_block_number().await.unwrap(), U64::from(42));
        provider.get_chainid().await.unwrap_err();
        assert_eq!(mock.request_count("eth_blockNumber"), 1);
        assert_eq!(mock.request_count("eth_chainId"), 1);
    }
}
