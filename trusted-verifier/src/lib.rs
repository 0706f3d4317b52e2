//! Trusted Verifier Service Library
//!
//! A verifier node of the bridge relay. It never submits transactions and
//! never sees the collector's ledger: given a proposal it re-derives every
//! transfer from the source chain, recomputes the payload hash and signs only
//! when everything matches.

pub mod api;
pub mod config;
pub mod crypto;
pub mod signer;
pub mod storage;
pub mod verifiers;

pub use config::{ApiConfig, ChainSection, Config, VerifierConfig};
pub use crypto::CryptoService;
pub use signer::SignerService;
pub use storage::{SignedPayload, SignedStore, StoreError};
pub use verifiers::{
    BtcLockVerifier, CanonicalTransfer, CkbBurnVerifier, EvmLockVerifier, TransferVerifier,
};
