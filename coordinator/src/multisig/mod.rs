//! Multisig coordination (collector role)
//!
//! Claims ledger rows, builds the canonical proposal, gathers M-of-N verifier
//! signatures and submits the authorized transaction.

mod collector;
mod coordinator;
mod peers;

pub use collector::{collect_signatures, BlockedRecord, Collection, RetryPolicy};
pub use coordinator::{
    run_mint_loop, run_unlock_loop, BatchState, CoordinatorError, CycleOutcome, MultisigCoordinator,
};
pub use peers::{HttpVerifierPeer, PeerError, SignatureSource};
