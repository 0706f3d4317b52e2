//! Minimal JSON-RPC transport shared by all node clients.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::client::ChainError;

// ============================================================================
// WIRE STRUCTURES
// ============================================================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// JSON-RPC 2.0 client bound to one node URL.
///
/// Every request carries the timeout configured at construction.
pub struct RpcTransport {
    client: Client,
    url: String,
    basic_auth: Option<(String, String)>,
    next_id: AtomicU64,
}

impl RpcTransport {
    /// Creates a transport for `url` with a per-request `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| ChainError::Transport {
                endpoint: url.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            basic_auth: None,
            next_id: AtomicU64::new(1),
        })
    }

    /// Adds HTTP basic credentials (bitcoind style RPC).
    pub fn with_basic_auth(mut self, user: &str, password: &str) -> Self {
        self.basic_auth = Some((user.to_string(), password.to_string()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Calls `method` and requires a non-null result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ChainError> {
        self.call_optional(method, params)
            .await?
            .ok_or_else(|| ChainError::NotFound(format!("{} returned null", method)))
    }

    /// Calls `method`; a null result maps to `Ok(None)`.
    pub async fn call_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some((user, password)) = &self.basic_auth {
            builder = builder.basic_auth(user, Some(password));
        }

        let response = builder.send().await.map_err(|e| ChainError::Transport {
            endpoint: self.url.clone(),
            message: format!("{} request failed: {}", method, e),
        })?;

        let body: JsonRpcResponse<T> = response.json().await.map_err(|e| ChainError::Transport {
            endpoint: self.url.clone(),
            message: format!("failed to parse {} response: {}", method, e),
        })?;

        if let Some(error) = body.error {
            debug!("{} {} failed with code {}: {}", self.url, method, error.code, error.message);
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(body.result)
    }
}
