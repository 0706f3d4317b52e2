//! CKB client for the home ledger.
//!
//! Burns are cells locked by the bridge lock whose data is a molecule
//! `RecipientCellData`. Mints spend the multisig state cell, whose data holds
//! the replay nonce, and create one sUDT cell per record.

pub mod client;
pub mod molecule;

pub use client::{CkbClient, CkbClientConfig, OutPoint};
pub use molecule::{MoleculeError, RecipientCellData};
