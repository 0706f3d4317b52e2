//! Signer API Server Module
//!
//! JSON-RPC 2.0 on `POST /` with one method per destination route
//! (`signCkbTx`, `signEthTx`, `signBtcTx`), plus `GET /health` and
//! `GET /public-key`. Every signing request runs the full validation in
//! [`SignerService::sign`]; the API adds nothing but framing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use bridge_protocol::{Proposal, SigErrorCode, SignError, SIGN_BTC_TX, SIGN_CKB_TX, SIGN_ETH_TX};

use crate::config::ApiConfig;
use crate::signer::SignerService;

const METHOD_NOT_FOUND: i64 = -32601;

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Response body of the plain HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerIdentity {
    pub address: String,
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RpcErrorData>,
}

/// Machine-readable detail of a refusal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcErrorData {
    pub ref_id: String,
}

impl From<SignError> for RpcErrorBody {
    fn from(err: SignError) -> Self {
        Self {
            code: err.code.code(),
            message: err.message,
            data: err.ref_id.map(|ref_id| RpcErrorData { ref_id }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

impl RpcResponse {
    fn new(id: Value, result: Result<Value, RpcErrorBody>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(err) => (None, Some(err)),
        };
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error,
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Params may be the proposal itself or a one-element array holding it.
fn proposal_param(params: Value) -> Result<Proposal, SignError> {
    let object = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    serde_json::from_value(object)
        .map_err(|e| SignError::new(SigErrorCode::InvalidParams, format!("invalid proposal: {}", e)))
}

async fn dispatch(request: RpcRequest, signer: &SignerService) -> Result<Value, RpcErrorBody> {
    match request.method.as_str() {
        SIGN_CKB_TX | SIGN_ETH_TX | SIGN_BTC_TX => {
            let proposal = proposal_param(request.params)?;
            let response = signer.sign(&request.method, &proposal).await?;
            serde_json::to_value(response).map_err(|e| RpcErrorBody {
                code: SigErrorCode::Unknown.code(),
                message: e.to_string(),
                data: None,
            })
        }
        other => Err(RpcErrorBody {
            code: METHOD_NOT_FOUND,
            message: format!("method {} not found", other),
            data: None,
        }),
    }
}

async fn handle_rpc(body: Bytes, signer: Arc<SignerService>) -> Result<impl Reply, Rejection> {
    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable JSON-RPC body: {}", String::from_utf8_lossy(&body));
            return Ok(warp::reply::json(&RpcResponse::new(
                Value::Null,
                Err(SignError::invalid_params(format!("invalid JSON: {}", e)).into()),
            )));
        }
    };
    let id = request.id.clone();
    let method = request.method.clone();
    let result = dispatch(request, &signer).await;
    if let Err(err) = &result {
        info!("{} refused ({}): {}", method, err.code, err.message);
    }
    Ok(warp::reply::json(&RpcResponse::new(id, result)))
}

pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else if let Some(err) = rej.find::<warp::reject::PayloadTooLarge>() {
        (StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

pub struct ApiServer {
    config: ApiConfig,
    signer: Arc<SignerService>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, signer: Arc<SignerService>) -> Self {
        Self { config, signer }
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting signer API on {}:{} as {}",
            self.config.host,
            self.config.port,
            self.signer.address()
        );
        let addr: std::net::SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Failed to parse API server address")?;
        warp::serve(self.create_routes()).run(addr).await;
        Ok(())
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("Bridge verifier is running".to_string()),
                error: None,
            })
        });

        let address = self.signer.address().to_string();
        let public_key = warp::path("public-key").and(warp::get()).map(move || {
            warp::reply::json(&ApiResponse {
                success: true,
                data: Some(SignerIdentity {
                    address: address.clone(),
                }),
                error: None,
            })
        });

        let signer = self.signer.clone();
        let rpc = warp::path::end()
            .and(warp::post())
            .and(warp::body::content_length_limit(1024 * 1024))
            .and(warp::body::bytes())
            .and(warp::any().map(move || signer.clone()))
            .and_then(handle_rpc);

        let cors = if self.config.cors_origins.iter().any(|o| o == "*") {
            warp::cors().allow_any_origin()
        } else {
            warp::cors().allow_origins(self.config.cors_origins.iter().map(|s| s.as_str()))
        }
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

        health
            .or(public_key)
            .or(rpc)
            .with(cors)
            .recover(handle_rejection)
    }

    /// Exposes the routes to integration tests.
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
