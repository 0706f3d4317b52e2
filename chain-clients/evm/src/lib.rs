//! EVM client for the bridge contract.
//!
//! Watches `Locked` and `Unlocked` logs, reads the multisig unlock nonce and
//! submits quorum-signed `unlock` calls.

pub mod abi;
pub mod client;

pub use client::{EvmClient, EvmClientConfig, UnsignedEvmTx};
