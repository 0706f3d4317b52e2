//! Verifier peer tests
//!
//! Run the HTTP peer against a mock verifier endpoint and check how replies,
//! refusals and bad signatures flow into a collection round.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bridge_protocol::{DomainSeparator, Proposal, SigErrorCode};
use chain_clients_common::{ChainKind, TransferKind, TransferRecord};
use coordinator::config::VerifierPeerConfig;
use coordinator::multisig::{collect_signatures, HttpVerifierPeer, PeerError, RetryPolicy};
use coordinator::SignatureSource;
use trusted_verifier::CryptoService;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{domain_config, CKB_RECIPIENT, ETH_TOKEN};

fn proposal() -> Proposal {
    let domain = DomainSeparator::compute(&domain_config(ChainKind::Nervos));
    Proposal::build(
        TransferKind::Mint,
        ChainKind::Ethereum,
        ChainKind::Nervos,
        0,
        vec![TransferRecord {
            asset: ETH_TOKEN.to_string(),
            recipient: CKB_RECIPIENT.to_string(),
            amount: 99_900,
            ref_id: format!("0x{:064x}#0", 1),
        }],
        &domain,
        None,
    )
    .unwrap()
}

fn peer(server: &MockServer, address: &str) -> Arc<dyn SignatureSource> {
    let config = VerifierPeerConfig {
        name: "mock".to_string(),
        url: server.uri(),
        address: address.to_string(),
    };
    Arc::new(HttpVerifierPeer::new(&config, Duration::from_secs(2)).unwrap())
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        retry_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(2),
        round_timeout: Duration::from_secs(5),
    }
}

fn signed_reply(crypto: &CryptoService, proposal: &Proposal) -> serde_json::Value {
    let signature = crypto.sign_digest(&proposal.claimed_digest().unwrap()).unwrap();
    json!({
        "jsonrpc": "2.0",
        "id": "1",
        "result": { "signature": format!("0x{}", hex::encode(signature)) }
    })
}

fn error_reply(code: i64, message: &str) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": "1",
        "error": { "code": code, "message": message }
    })
}

// ============================================================================
// HTTP PEER
// ============================================================================

/// Test that a verifier signature is fetched and accepted
/// What is tested: signCkbTx against a mock verifier signing with a known key
/// Why: The collector must speak the verifier's JSON-RPC dialect
#[tokio::test]
async fn test_signature_is_collected_over_http() {
    let server = MockServer::start().await;
    let crypto = CryptoService::from_key_bytes(&[9u8; 32]).unwrap();
    let proposal = proposal();
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_partial_json(json!({ "jsonrpc": "2.0", "method": "signCkbTx" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(signed_reply(&crypto, &proposal)))
        .expect(1)
        .mount(&server)
        .await;

    let peers = vec![peer(&server, crypto.address())];
    let collection = collect_signatures(
        &proposal,
        &proposal.claimed_digest().unwrap(),
        &peers,
        1,
        policy(1),
    )
    .await;
    assert!(collection.reached(1));
    assert_eq!(collection.signatures[0].0, crypto.address());
    assert_eq!(collection.signatures[0].1.len(), 65);
}

/// Test that a signature from the wrong key is discarded
/// What is tested: a mock verifier signing with a key other than its configured address
/// Why: Only configured verifier identities count toward the threshold
#[tokio::test]
async fn test_signature_from_unexpected_key_is_rejected() {
    let server = MockServer::start().await;
    let impostor = CryptoService::from_key_bytes(&[10u8; 32]).unwrap();
    let expected = CryptoService::from_key_bytes(&[11u8; 32]).unwrap();
    let proposal = proposal();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(signed_reply(&impostor, &proposal)))
        .mount(&server)
        .await;

    let peers = vec![peer(&server, expected.address())];
    let collection = collect_signatures(
        &proposal,
        &proposal.claimed_digest().unwrap(),
        &peers,
        1,
        policy(1),
    )
    .await;
    assert!(!collection.reached(1));
    assert!(collection.refusals[0].1.contains("recovers to"));
}

/// Test that retryable refusals are asked again
/// What is tested: a verifier answering TxUnconfirmed (1003) three times
/// Why: A verifier a block behind the collector should get another chance
#[tokio::test]
async fn test_retryable_refusal_is_retried() {
    let server = MockServer::start().await;
    let proposal = proposal();
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(error_reply(1003, "transaction is not confirmed")),
        )
        .expect(3)
        .mount(&server)
        .await;

    let peers = vec![peer(&server, "0x0000000000000000000000000000000000000001")];
    let collection = collect_signatures(
        &proposal,
        &proposal.claimed_digest().unwrap(),
        &peers,
        1,
        policy(3),
    )
    .await;
    assert!(!collection.reached(1));
    assert_eq!(collection.refusals.len(), 1);
}

/// Test that a final refusal is not retried
/// What is tested: a verifier answering InvalidRecord (1001)
/// Why: Asking again cannot change a verdict on the records themselves
#[tokio::test]
async fn test_invalid_record_is_not_retried() {
    let server = MockServer::start().await;
    let proposal = proposal();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(error_reply(1001, "amount mismatch")))
        .expect(1)
        .mount(&server)
        .await;

    let peer = peer(&server, "0x0000000000000000000000000000000000000001");
    let err = peer.request_signature("signCkbTx", &proposal).await.unwrap_err();
    match &err {
        PeerError::Refused(refusal) => {
            assert_eq!(refusal.code, SigErrorCode::InvalidRecord);
            assert_eq!(refusal.message, "amount mismatch");
            assert!(refusal.ref_id.is_none());
        }
        other => panic!("expected a refusal, got {:?}", other),
    }
    assert!(!err.is_retryable());
}

/// Test that a refusal naming a record keeps the reference
/// What is tested: an InvalidRecord error whose data carries refId
/// Why: The collector quarantines exactly the records verifiers refuse
#[tokio::test]
async fn test_refusal_names_record() {
    let server = MockServer::start().await;
    let proposal = proposal();
    let ref_id = proposal.records[0].ref_id.clone();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {
                "code": 1001,
                "message": "amount mismatch",
                "data": { "refId": ref_id }
            }
        })))
        .mount(&server)
        .await;

    let peer = peer(&server, "0x0000000000000000000000000000000000000001");
    match peer.request_signature("signCkbTx", &proposal).await {
        Err(PeerError::Refused(refusal)) => {
            assert_eq!(refusal.code, SigErrorCode::InvalidRecord);
            assert_eq!(refusal.ref_id.as_deref(), Some(ref_id.as_str()));
        }
        other => panic!("expected a refusal, got {:?}", other),
    }
}

/// Test that an unreadable reply is a transport error
/// What is tested: a verifier answering with a non-JSON body
/// Why: A broken proxy in front of a verifier must not look like a verdict
#[tokio::test]
async fn test_unreadable_reply_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let peer = peer(&server, "0x0000000000000000000000000000000000000001");
    let err = peer.request_signature("signCkbTx", &proposal()).await.unwrap_err();
    assert!(matches!(err, PeerError::Transport(_)));
    assert!(err.is_retryable());
}
