//! Shared utilities for the bridge chain clients.
//!
//! Every chain the relay talks to (the home ledger and each foreign chain) is
//! reached through the [`ChainClient`] trait defined here. The trait speaks a
//! chain-neutral vocabulary: blocks carry already-decoded bridge events, and
//! submissions take a [`SignedBatch`] that the concrete client turns into its
//! own transaction format.

pub mod client;
pub mod hex_utils;
pub mod rpc;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use client::{ChainClient, ChainError};
pub use rpc::RpcTransport;
pub use types::{
    ChainBlock, ChainEvent, ChainKind, EventKind, ObservedTransaction, SignedBatch, TransferKind,
    TransferRecord, TxStatus,
};
