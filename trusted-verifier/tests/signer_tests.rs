//! Signing decision tests
//!
//! Every test wires a verifier to in-memory chains, mines the source events
//! it needs and asks for a signature the way the collector would.

use std::sync::Arc;

use bridge_protocol::{
    decode_signature_hex, recover_signer, Proposal, SigErrorCode, SIGN_BTC_TX, SIGN_CKB_TX,
    SIGN_ETH_TX,
};
use chain_clients_common::{ChainClient, ChainKind, EventKind, SignedBatch, TransferKind};
use trusted_verifier::SignedStore;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    build_signer, burn_on_nervos, lock_on_bitcoin, lock_on_ethereum, mint_proposal,
    unlock_proposal, TestChains, CKB_RECIPIENT, ETH_SENDER, ETH_TOKEN,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn memory_store() -> Arc<SignedStore> {
    Arc::new(SignedStore::open_in_memory().unwrap())
}

fn recovered_signer(proposal: &Proposal, signature: &str) -> String {
    let bytes = decode_signature_hex(signature).unwrap();
    recover_signer(&proposal.claimed_digest().unwrap(), &bytes).unwrap()
}

/// Consumes the current multisig nonce of an on-chain-nonce chain.
async fn consume_nonce(client: &dyn ChainClient, kind: TransferKind) {
    let nonce = client.multisig_nonce().await.unwrap().unwrap();
    client
        .submit_multisig(&SignedBatch {
            kind,
            chain: client.chain(),
            nonce,
            records: Vec::new(),
            signatures: Vec::new(),
            raw_transaction: None,
        })
        .await
        .unwrap();
}

// ============================================================================
// HAPPY PATHS
// ============================================================================

/// Test that a correct mint proposal is signed by the verifier's key
/// What is tested: a confirmed Ethereum lock, proposed at the home-ledger
/// nonce with the fee already deducted, returns a signature over the payload
/// hash that recovers to the verifier address
/// Why: the collector can only reach quorum with signatures that verify
#[tokio::test]
async fn test_valid_mint_is_signed() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let response = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap();

    assert_eq!(recovered_signer(&proposal, &response.signature), signer.address());
}

/// Test that an unlock to Ethereum is signed
/// What is tested: a confirmed home-ledger burn destined for Ethereum is
/// signed through signEthTx at the Ethereum multisig nonce
/// Why: unlocks follow the same verification path with the roles of home and
/// foreign chain swapped
#[tokio::test]
async fn test_valid_unlock_is_signed() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let burn = burn_on_nervos(&chains, 7, ChainKind::Ethereum, 3_000);

    let proposal = unlock_proposal(ChainKind::Ethereum, 0, &[(burn, 2_900)]);
    let response = signer.sign(SIGN_ETH_TX, &proposal).await.unwrap();

    assert_eq!(recovered_signer(&proposal, &response.signature), signer.address());
}

/// Test that several locks in one proposal are verified together
/// What is tested: a mint of three Ethereum locks in canonical order
/// Why: the collector batches every pending mint of a source chain
#[tokio::test]
async fn test_batched_mint_is_signed() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let transfers: Vec<(String, u128)> = (10..13)
        .map(|seed| (lock_on_ethereum(&chains, seed, 2_000), 1_900))
        .collect();

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &transfers);
    assert_eq!(proposal.records.len(), 3);
    assert!(signer.sign(SIGN_CKB_TX, &proposal).await.is_ok());
}

// ============================================================================
// RECORD VERIFICATION
// ============================================================================

/// Test that a one-byte change of the payload hash is refused
/// What is tested: records match the chain but the claimed hash differs in
/// its last byte
/// Why: verifiers sign the hash they recompute, never the one they are given
#[tokio::test]
async fn test_tampered_payload_hash_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let mut proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let last = proposal.payload_hash.pop().unwrap();
    proposal.payload_hash.push(if last == '0' { '1' } else { '0' });

    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();
    assert_eq!(err.code, SigErrorCode::InvalidParams);
    assert!(err.message.contains("payload hash mismatch"));
}

/// Test that a proposal claiming more than the lock minus fee is refused
/// What is tested: amount equal to the gross lock amount
/// Why: the fee is part of what verifiers derive independently
#[tokio::test]
async fn test_amount_mismatch_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock.clone(), 5_000)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::InvalidRecord);
    assert!(err.message.contains("amount mismatch"));
    assert_eq!(err.ref_id, Some(lock));
}

/// Test that a redirected recipient is refused
/// What is tested: the proposal pays a different home-ledger identity than
/// the lock named, with the hash recomputed to match
/// Why: a compromised collector must not be able to redirect funds
#[tokio::test]
async fn test_recipient_mismatch_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let honest = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let mut records = honest.records.clone();
    records[0].recipient = "0x00000000000000000000000000000000000000dd".to_string();
    let forged = Proposal::build(
        TransferKind::Mint,
        ChainKind::Ethereum,
        ChainKind::Nervos,
        0,
        records,
        &bridge_protocol::DomainSeparator::compute(&test_helpers::domain_config(ChainKind::Nervos)),
        honest.raw_transaction.clone(),
    )
    .unwrap();

    let err = signer.sign(SIGN_CKB_TX, &forged).await.unwrap_err();
    assert_eq!(err.code, SigErrorCode::InvalidRecord);
    assert!(err.message.contains("recipient mismatch"));
}

/// Test that a lock without enough confirmations is not signed yet
/// What is tested: the lock block is the chain tip
/// Why: signing before the confirmation depth risks minting on a reorged lock
#[tokio::test]
async fn test_unconfirmed_lock_is_retryable() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let tx = format!("0x{:064x}", 99);
    chains.ethereum.mine(vec![(
        tx.clone(),
        0,
        EventKind::Lock {
            asset: ETH_TOKEN.to_string(),
            amount: 5_000,
            sender: ETH_SENDER.to_string(),
            recipient: CKB_RECIPIENT.to_string(),
            extra_data: String::new(),
        },
    )]);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(format!("{}#0", tx), 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::TxUnconfirmed);
    assert!(err.code.is_retryable());
}

/// Test that a lock the verifier cannot see is reported as not found
/// What is tested: a reference to a transaction that was never mined
/// Why: a lagging node answers "not found" so the collector retries instead
/// of treating the proposal as forged
#[tokio::test]
async fn test_unknown_lock_is_not_found() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(format!("0x{:064x}#0", 404), 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::TxNotFound);
}

/// Test that a lock below the asset minimum is refused
/// What is tested: lock amount under the configured minimum
/// Why: such locks are never minted, so no quorum may exist for them
#[tokio::test]
async fn test_lock_below_minimum_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 500);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 400)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::InvalidRecord);
}

/// Test that a rewritten home-ledger transaction is refused
/// What is tested: the carried mint transaction pays a cell to an extra
/// lock script while the records are honest
/// Why: verifiers sign what is submitted, so the transaction itself must be
/// rebuilt and compared
#[tokio::test]
async fn test_tampered_mint_transaction_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let mut proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let raw = proposal.raw_transaction.as_mut().unwrap();
    raw["outputs"][0]["lock"]["args"] =
        serde_json::json!("0x00000000000000000000000000000000000000dd");

    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();
    assert_eq!(err.code, SigErrorCode::InvalidRecord);
}

/// Test that a burn paying out on Bitcoin cannot be signed for Ethereum
/// What is tested: the derived destination differs from the proposal chain
/// Why: the destination is read from the burn, never from the proposal
#[tokio::test]
async fn test_unlock_to_wrong_destination_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let burn = burn_on_nervos(&chains, 8, ChainKind::Bitcoin, 50_000);

    let proposal = unlock_proposal(ChainKind::Ethereum, 0, &[(burn, 49_000)]);
    let err = signer.sign(SIGN_ETH_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::InvalidRecord);
}

/// Test that a proposal sent to the wrong method is refused
/// What is tested: a mint proposal sent to signEthTx
/// Why: each method signs exactly one kind of batch
#[tokio::test]
async fn test_wrong_method_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let err = signer.sign(SIGN_ETH_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::InvalidParams);
}

/// Test that a chain outage surfaces as a retryable refusal
/// What is tested: the Ethereum client fails its next read
/// Why: a node that cannot see the chain must not look like it caught a
/// forgery
#[tokio::test]
async fn test_chain_outage_is_retryable() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);
    chains.ethereum.fail_next_reads(1);

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert!(err.code.is_retryable(), "got {:?}", err);
}

// ============================================================================
// NONCES AND REPLAY
// ============================================================================

/// Test that a nonce below the destination multisig nonce is refused
/// What is tested: the home ledger already consumed nonce 0
/// Why: a batch at a consumed nonce can never execute
#[tokio::test]
async fn test_stale_nonce_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);
    consume_nonce(chains.nervos.as_ref(), TransferKind::Mint).await;

    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::InvalidParams);
    assert!(err.message.contains("stale nonce"));
}

/// Test that a nonce ahead of the chain is reported as a sync problem
/// What is tested: proposal nonce 1 while the chain is at 0
/// Why: the verifier may simply be behind the collector's node
#[tokio::test]
async fn test_future_nonce_is_retryable() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let proposal = mint_proposal(ChainKind::Ethereum, 1, &[(lock, 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::BlockSyncUncompleted);
}

/// Test that asking twice for the same payload returns the same signature
/// What is tested: two identical requests, then a third after the nonce was
/// consumed on chain
/// Why: collector retries must be harmless, and the stored answer is given
/// before any nonce check
#[tokio::test]
async fn test_repeated_request_returns_stored_signature() {
    let chains = TestChains::new();
    let store = memory_store();
    let signer = build_signer(0, &chains, store.clone());
    let lock = lock_on_ethereum(&chains, 1, 5_000);
    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);

    let first = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap();
    let second = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap();
    consume_nonce(chains.nervos.as_ref(), TransferKind::Mint).await;
    let third = signer.sign(SIGN_CKB_TX, &proposal).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);
    assert_eq!(store.count().unwrap(), 1);
}

/// Test that a reference signed at a consumed nonce is reported as completed
/// What is tested: a lock signed at nonce 0, the nonce consumed, then the
/// same lock proposed at nonce 1
/// Why: the earlier batch may have executed; signing again could mint twice
#[tokio::test]
async fn test_reference_signed_at_consumed_nonce_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_ethereum(&chains, 1, 5_000);

    let first = mint_proposal(ChainKind::Ethereum, 0, &[(lock.clone(), 4_900)]);
    signer.sign(SIGN_CKB_TX, &first).await.unwrap();
    consume_nonce(chains.nervos.as_ref(), TransferKind::Mint).await;

    let again = mint_proposal(ChainKind::Ethereum, 1, &[(lock.clone(), 4_900)]);
    let err = signer.sign(SIGN_CKB_TX, &again).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::TxCompleted);
    assert_eq!(err.ref_id, Some(lock));
}

/// Test that a reference may be re-batched at the same nonce slot
/// What is tested: lock A signed alone at nonce 0, then A together with a
/// new lock B at nonce 0
/// Why: only one payload per nonce can ever execute on the home ledger, so
/// rebuilding a round with more records is safe
#[tokio::test]
async fn test_rebatch_at_same_nonce_is_signed() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let a = lock_on_ethereum(&chains, 1, 5_000);
    let b = lock_on_ethereum(&chains, 2, 6_000);

    let alone = mint_proposal(ChainKind::Ethereum, 0, &[(a.clone(), 4_900)]);
    signer.sign(SIGN_CKB_TX, &alone).await.unwrap();

    let both = mint_proposal(ChainKind::Ethereum, 0, &[(a, 4_900), (b, 5_900)]);
    tokio_test::assert_ok!(signer.sign(SIGN_CKB_TX, &both).await);
}

/// Test that Bitcoin references are never signed into two payloads
/// What is tested: a burn signed for Bitcoin at nonce 0, then proposed again
/// at nonce 1
/// Why: Bitcoin has no on-chain replay nonce; the signed table is the only
/// guard against paying twice
#[tokio::test]
async fn test_bitcoin_reference_is_signed_once() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let burn = burn_on_nervos(&chains, 9, ChainKind::Bitcoin, 50_000);

    let first = unlock_proposal(ChainKind::Bitcoin, 0, &[(burn.clone(), 49_000)]);
    signer.sign(SIGN_BTC_TX, &first).await.unwrap();

    let second = unlock_proposal(ChainKind::Bitcoin, 1, &[(burn.clone(), 49_000)]);
    let err = signer.sign(SIGN_BTC_TX, &second).await.unwrap_err();

    assert_eq!(err.code, SigErrorCode::DuplicateSign);
    assert_eq!(err.ref_id, Some(burn));
}

/// Test that Bitcoin nonces must grow
/// What is tested: a fresh burn proposed at a nonce already signed for
/// Bitcoin
/// Why: without a chain nonce the verifier enforces monotonicity itself
#[tokio::test]
async fn test_bitcoin_nonce_reuse_is_refused() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let first_burn = burn_on_nervos(&chains, 9, ChainKind::Bitcoin, 50_000);
    let second_burn = burn_on_nervos(&chains, 10, ChainKind::Bitcoin, 60_000);

    let first = unlock_proposal(ChainKind::Bitcoin, 3, &[(first_burn, 49_000)]);
    signer.sign(SIGN_BTC_TX, &first).await.unwrap();

    let reused = unlock_proposal(ChainKind::Bitcoin, 3, &[(second_burn.clone(), 59_000)]);
    let err = signer.sign(SIGN_BTC_TX, &reused).await.unwrap_err();
    assert_eq!(err.code, SigErrorCode::InvalidParams);

    let next = unlock_proposal(ChainKind::Bitcoin, 4, &[(second_burn, 59_000)]);
    assert!(signer.sign(SIGN_BTC_TX, &next).await.is_ok());
}

/// Test that a Bitcoin lock mints through signCkbTx
/// What is tested: a confirmed output paying the custody address
/// Why: every configured foreign chain is a mint source
#[tokio::test]
async fn test_bitcoin_lock_mint_is_signed() {
    let chains = TestChains::new();
    let signer = build_signer(0, &chains, memory_store());
    let lock = lock_on_bitcoin(&chains, 3, 100_000);

    let proposal = mint_proposal(ChainKind::Bitcoin, 0, &[(lock, 99_000)]);
    tokio_test::assert_ok!(signer.sign(SIGN_CKB_TX, &proposal).await);
}

/// Test that the signed table survives a restart
/// What is tested: sign with a file-backed store, rebuild the signer over a
/// reopened store, then ask for a conflicting Bitcoin payload
/// Why: a restarted verifier must not forget what it already signed
#[tokio::test]
async fn test_signed_table_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verifier.db");
    let chains = TestChains::new();
    let burn = burn_on_nervos(&chains, 9, ChainKind::Bitcoin, 50_000);
    let first = unlock_proposal(ChainKind::Bitcoin, 0, &[(burn.clone(), 49_000)]);

    let signature = {
        let signer = build_signer(0, &chains, Arc::new(SignedStore::open(&path).unwrap()));
        signer.sign(SIGN_BTC_TX, &first).await.unwrap()
    };

    let restarted = build_signer(0, &chains, Arc::new(SignedStore::open(&path).unwrap()));
    assert_eq!(restarted.sign(SIGN_BTC_TX, &first).await.unwrap(), signature);

    let second = unlock_proposal(ChainKind::Bitcoin, 1, &[(burn, 49_000)]);
    let err = restarted.sign(SIGN_BTC_TX, &second).await.unwrap_err();
    assert_eq!(err.code, SigErrorCode::DuplicateSign);
}

/// Test that concurrent identical requests produce one stored signing
/// What is tested: the same proposal signed from four tasks at once
/// Why: the check-sign-persist section is serialized
#[tokio::test]
async fn test_concurrent_requests_store_once() {
    let chains = TestChains::new();
    let store = memory_store();
    let signer = Arc::new(build_signer(0, &chains, store.clone()));
    let lock = lock_on_ethereum(&chains, 1, 5_000);
    let proposal = mint_proposal(ChainKind::Ethereum, 0, &[(lock, 4_900)]);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let signer = signer.clone();
            let proposal = proposal.clone();
            tokio::spawn(async move { signer.sign(SIGN_CKB_TX, &proposal).await })
        })
        .collect();
    let mut signatures = Vec::new();
    for handle in handles {
        signatures.push(handle.await.unwrap().unwrap().signature);
    }

    signatures.dedup();
    assert_eq!(signatures.len(), 1);
    assert_eq!(store.count().unwrap(), 1);
}
