//! Tests for the shared JSON-RPC transport

use chain_clients_common::{ChainError, RpcTransport};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test that a successful result is decoded into the requested type
/// What is tested: call() sends a JSON-RPC 2.0 envelope and decodes `result`
/// Why: Every chain client relies on this path for block and tx queries
#[tokio::test]
async fn test_call_decodes_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"jsonrpc": "2.0", "method": "eth_blockNumber"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": "0x10"
        })))
        .mount(&server)
        .await;

    let transport = RpcTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let height: String = transport.call("eth_blockNumber", json!([])).await.unwrap();
    assert_eq!(height, "0x10");
}

/// Test that a JSON-RPC error object becomes ChainError::Rpc
/// What is tested: error code and message are carried through
/// Why: Rpc errors are transient and must be distinguishable from decode errors
#[tokio::test]
async fn test_call_maps_rpc_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "header not found"}
        })))
        .mount(&server)
        .await;

    let transport = RpcTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let err = transport
        .call::<String>("eth_getBlockByNumber", json!(["0x1", false]))
        .await
        .unwrap_err();
    match err {
        ChainError::Rpc { code, ref message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "header not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_transient());
}

/// Test that a null result is Ok(None) for call_optional and NotFound for call
/// What is tested: null handling on both entry points
/// Why: Unknown transactions come back as null and must not look like failures
#[tokio::test]
async fn test_null_result_handling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": null
        })))
        .mount(&server)
        .await;

    let transport = RpcTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    let missing: Option<serde_json::Value> = transport
        .call_optional("eth_getTransactionReceipt", json!(["0x01"]))
        .await
        .unwrap();
    assert!(missing.is_none());

    let err = transport
        .call::<serde_json::Value>("eth_getTransactionReceipt", json!(["0x01"]))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::NotFound(_)));
    assert!(!err.is_transient());
}

/// Test that a slow node trips the per-request timeout
/// What is tested: the transport never waits longer than its configured timeout
/// Why: No outbound call in the relay may block without a bound
#[tokio::test]
async fn test_request_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let transport = RpcTransport::new(&server.uri(), Duration::from_millis(100)).unwrap();
    let err = transport.call::<String>("eth_blockNumber", json!([])).await.unwrap_err();
    assert!(matches!(err, ChainError::Transport { .. }));
}
