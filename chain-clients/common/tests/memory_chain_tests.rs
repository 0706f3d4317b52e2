//! Tests for the in-memory chain used by the relay test suites

use chain_clients_common::memory::MemoryChain;
use chain_clients_common::{
    ChainClient, ChainError, ChainKind, EventKind, SignedBatch, TransferKind, TransferRecord,
};

fn lock_event(amount: u128) -> EventKind {
    EventKind::Lock {
        asset: "0x0000000000000000000000000000000000000000".to_string(),
        amount,
        sender: "0x1111111111111111111111111111111111111111".to_string(),
        recipient: "0xabcdef".to_string(),
        extra_data: String::new(),
    }
}

fn unlock_batch(nonce: u64) -> SignedBatch {
    SignedBatch {
        kind: TransferKind::Unlock,
        chain: ChainKind::Ethereum,
        nonce,
        records: vec![TransferRecord {
            asset: "0x0000000000000000000000000000000000000000".to_string(),
            recipient: "0x2222222222222222222222222222222222222222".to_string(),
            amount: 10,
            ref_id: "0xburn".to_string(),
        }],
        signatures: vec![vec![0u8; 65]],
        raw_transaction: None,
    }
}

/// Test that confirmations count from the including block to the tip
/// What is tested: transaction() reports depth and events of a mined lock
/// Why: Verifiers decide finality from this number
#[tokio::test]
async fn test_confirmations_grow_with_tip() {
    let chain = MemoryChain::new(ChainKind::Ethereum);
    let height = chain.mine(vec![("0xaa".to_string(), 0, lock_event(5))]);
    assert_eq!(height, 1);

    let tx = chain.transaction("0xaa").await.unwrap().unwrap();
    assert_eq!(tx.confirmations, 1);
    assert_eq!(tx.events.len(), 1);

    chain.mine_empty(2);
    let tx = chain.transaction("0xaa").await.unwrap().unwrap();
    assert_eq!(tx.confirmations, 3);
    assert!(chain.transaction("0xbb").await.unwrap().is_none());
}

/// Test that an outdated nonce is rejected and a current one advances it
/// What is tested: nonce enforcement on submit_multisig
/// Why: Replay of an old signed batch must fail at the destination
#[tokio::test]
async fn test_nonce_enforced_on_submit() {
    let chain = MemoryChain::new(ChainKind::Ethereum).with_nonce(3);
    let tx_id = chain.submit_multisig(&unlock_batch(3)).await.unwrap();
    assert_eq!(chain.current_nonce(), Some(4));

    let replay = chain.submit_multisig(&unlock_batch(3)).await.unwrap_err();
    assert!(matches!(replay, ChainError::Rejected(_)));

    let settled = chain.transaction(&tx_id).await.unwrap().unwrap();
    assert_eq!(
        settled.events[0].kind,
        EventKind::Settlement { reference: "0xburn".to_string() }
    );
}

/// Test that heights under the prune horizon are reported as pruned
/// What is tested: block() error for pruned heights
/// Why: Watchers must stop instead of silently skipping history
#[tokio::test]
async fn test_pruned_heights() {
    let chain = MemoryChain::new(ChainKind::Bitcoin);
    chain.mine_empty(5);
    chain.set_prune_horizon(3);
    assert!(matches!(chain.block(1).await, Err(ChainError::Pruned { .. })));
    assert!(chain.block(4).await.unwrap().is_some());
    assert!(chain.block(9).await.unwrap().is_none());
}
