//! Bridge Signing Protocol
//!
//! Types and checks shared by the collector (coordinator) and the verifier
//! nodes. The collector builds a [`Proposal`] from ledger records; each
//! verifier re-derives the records from source-chain truth and calls
//! [`verify_proposal`], which is the one place the payload-hash equality
//! check lives.

pub mod ckb_shape;
pub mod errors;
pub mod fees;
pub mod payload;
pub mod proposal;
pub mod signature;

pub use chain_clients_common::{ChainKind, TransferKind, TransferRecord};
pub use errors::{SigErrorCode, SignError};
pub use fees::{AssetPolicy, Assessment, FeeTable};
pub use payload::{signing_digest, DomainConfig, DomainSeparator};
pub use proposal::{
    canonicalize, verify_proposal, Proposal, SignResponse, SIGN_BTC_TX, SIGN_CKB_TX, SIGN_ETH_TX,
};
pub use signature::{
    address_of, decode_signature_hex, order_signatures, recover_signer, SignatureError,
};
