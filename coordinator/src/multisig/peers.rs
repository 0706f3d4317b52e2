//! Verifier peers the collector asks for signatures.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use bridge_protocol::signature::decode_signature_hex;
use bridge_protocol::{Proposal, SigErrorCode, SignError, SignResponse};

use crate::config::VerifierPeerConfig;

#[derive(Debug, Error)]
pub enum PeerError {
    /// The request never got a verdict: timeout, connection refused, bad body.
    #[error("transport error: {0}")]
    Transport(String),
    /// The verifier answered with a signing error.
    #[error("verifier refused: {0}")]
    Refused(SignError),
}

impl PeerError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PeerError::Transport(_) => true,
            PeerError::Refused(err) => err.code.is_retryable(),
        }
    }
}

/// One verifier node.
#[async_trait]
pub trait SignatureSource: Send + Sync {
    fn name(&self) -> &str;

    /// Address the verifier's signatures must recover to.
    fn identity(&self) -> &str;

    /// Returns the 65-byte signature over the proposal's payload hash.
    async fn request_signature(
        &self,
        method: &str,
        proposal: &Proposal,
    ) -> Result<Vec<u8>, PeerError>;
}

// ============================================================================
// HTTP PEER
// ============================================================================

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: &'a Proposal,
}

#[derive(Debug, Deserialize)]
struct RpcReply {
    result: Option<SignResponse>,
    error: Option<RpcReplyError>,
}

#[derive(Debug, Deserialize)]
struct RpcReplyError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<RpcReplyErrorData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReplyErrorData {
    ref_id: Option<String>,
}

/// Verifier reached over its JSON-RPC endpoint.
pub struct HttpVerifierPeer {
    name: String,
    url: String,
    address: String,
    client: Client,
}

impl HttpVerifierPeer {
    pub fn new(config: &VerifierPeerConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).no_proxy().build()?;
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            address: config.address.to_ascii_lowercase(),
            client,
        })
    }
}

#[async_trait]
impl SignatureSource for HttpVerifierPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.address
    }

    async fn request_signature(
        &self,
        method: &str,
        proposal: &Proposal,
    ) -> Result<Vec<u8>, PeerError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: uuid::Uuid::new_v4().to_string(),
            method,
            params: proposal,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| PeerError::Transport(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        let reply: RpcReply = response.json().await.map_err(|e| {
            PeerError::Transport(format!("{} returned {} with unreadable body: {}", self.url, status, e))
        })?;

        if let Some(error) = reply.error {
            let mut refusal = SignError::new(SigErrorCode::from_code(error.code), error.message);
            refusal.ref_id = error.data.and_then(|data| data.ref_id);
            return Err(PeerError::Refused(refusal));
        }
        let result = reply
            .result
            .ok_or_else(|| PeerError::Transport(format!("{} returned no result", self.url)))?;
        decode_signature_hex(&result.signature)
            .map_err(|e| PeerError::Transport(format!("{} returned a bad signature: {}", self.url, e)))
    }
}
