//! Bitcoin client for the bridge custody address.
//!
//! A lock is a transaction whose first output pays the multisig custody
//! address and whose second output is an OP_RETURN carrying the home-ledger
//! recipient. Unlock payouts carry an OP_RETURN of `"unlock"` followed by the
//! 32-byte burn hashes they settle.

pub mod client;
pub mod script;

pub use client::{BtcClient, BtcClientConfig, BtcLockPayment, NATIVE_ASSET};
