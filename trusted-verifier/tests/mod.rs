//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_signer, build_test_config, burn_on_nervos, ckb_scripts, domain_config, fee_table,
    lock_on_bitcoin, lock_on_ethereum, mint_proposal, test_key, unlock_proposal, TestChains,
    BTC_RECIPIENT, CKB_RECIPIENT, ETH_RECIPIENT, ETH_SENDER, ETH_TOKEN,
};
