//! Bridge Collector Library
//!
//! The collector watches every bridged chain, records each lock and burn in
//! the transfer ledger, and drives the multisig rounds that mint on the home
//! ledger or unlock on a foreign chain. It holds no signing key: every
//! destination transaction needs M-of-N signatures from independent verifiers.

pub mod api;
pub mod config;
pub mod ledger;
pub mod multisig;
pub mod reconciliation;
pub mod watcher;

pub use config::Config;
pub use ledger::{Ledger, LedgerError, TransferStatus};
pub use multisig::{CycleOutcome, MultisigCoordinator, SignatureSource};
pub use reconciliation::{ReconciliationChecker, ReconciliationReport};
pub use watcher::{ChainWatcher, WatchError};
