//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_coordinator, burn_on_nervos, domain_config, fee_table, in_process_verifiers, lock_on_bitcoin,
    lock_on_ethereum, multisig_config, poll, sample_lock, RecordRefusingPeer, RefusingPeer, TestChains,
    UnreachablePeer, BTC_RECIPIENT, CKB_RECIPIENT, CONFIRMATIONS, ETH_RECIPIENT, ETH_SENDER,
    ETH_TOKEN,
};
