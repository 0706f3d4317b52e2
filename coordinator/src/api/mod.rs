//! Collector API Server Module
//!
//! JSON-RPC 2.0 on `POST /` for wallets and operators, plus `GET /health`.
//! Only the admin methods change state, and none of them touch signing.

mod bridge;
mod rpc;

pub use bridge::{
    AssetAmount, BridgeChains, FromTransaction, SummaryStatus, ToTransaction, TransactionSummary,
    TxSummary,
};
pub use rpc::{RpcError, RpcResponse};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};
use warp::http::{Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::config::Config;
use crate::ledger::Ledger;
use crate::reconciliation::ReconciliationChecker;
use bridge::BridgeApi;

/// Response body of the plain HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];
    if allowed_origins.iter().any(|o| o == "*") {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
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

async fn handle_rpc(body: Bytes, api: Arc<BridgeApi>) -> Result<impl Reply, Rejection> {
    let request: rpc::RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable JSON-RPC body: {}", String::from_utf8_lossy(&body));
            return Ok(warp::reply::json(&RpcResponse::from_result(
                serde_json::Value::Null,
                Err(RpcError::new(rpc::PARSE_ERROR, format!("invalid JSON: {}", e))),
            )));
        }
    };
    debug!("RPC {}", request.method);
    let result = api.dispatch(&request).await;
    if let Err(err) = &result {
        info!("RPC {} failed: {}", request.method, err.message);
    }
    Ok(warp::reply::json(&RpcResponse::from_result(
        request.id.clone(),
        result,
    )))
}

/// HTTP server of the collector.
pub struct ApiServer {
    config: Arc<Config>,
    api: Arc<BridgeApi>,
}

impl ApiServer {
    /// Creates the server. The admin secret is read from the environment
    /// variable named by `admin.key_env`; without it admin methods always
    /// refuse.
    pub fn new(
        config: Config,
        ledger: Arc<Ledger>,
        chains: BridgeChains,
        reconciliation: Arc<ReconciliationChecker>,
    ) -> Self {
        let admin_key = std::env::var(&config.admin.key_env)
            .ok()
            .filter(|key| !key.is_empty());
        let api = BridgeApi {
            ledger,
            chains,
            fees: config.fees.clone(),
            reconciliation,
            admin_key,
        };
        Self {
            config: Arc::new(config),
            api: Arc::new(api),
        }
    }

    /// Replaces the admin secret.
    pub fn with_admin_key(mut self, key: Option<String>) -> Self {
        if let Some(api) = Arc::get_mut(&mut self.api) {
            api.admin_key = key;
        }
        self
    }

    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );
        let routes = self.create_routes();
        let addr: std::net::SocketAddr =
            format!("{}:{}", self.config.api.host, self.config.api.port)
                .parse()
                .context("Failed to parse API server address")?;
        warp::serve(routes).run(addr).await;
        Ok(())
    }

    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let health = warp::path("health").and(warp::get()).map(|| {
            warp::reply::json(&ApiResponse::<String> {
                success: true,
                data: Some("Bridge collector is running".to_string()),
                error: None,
            })
        });

        let api = self.api.clone();
        let rpc = warp::path::end()
            .and(warp::post())
            .and(warp::body::content_length_limit(1024 * 1024))
            .and(warp::body::bytes())
            .and(warp::any().map(move || api.clone()))
            .and_then(handle_rpc);

        health
            .or(rpc)
            .with(create_cors_filter(&self.config.api.cors_origins))
            .recover(handle_rejection)
    }

    /// Exposes the routes to integration tests.
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
