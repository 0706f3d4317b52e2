//! Shape of a home-ledger mint transaction.
//!
//! Both the collector and every verifier build this from records, so a
//! verifier can compare the collector's unsigned transaction output by output.
//! Inputs, cell deps and witnesses are filled in by the home-ledger client at
//! submission time and are not part of what gets verified here.

use serde::{Deserialize, Serialize};

use chain_clients_common::hex_utils::normalize_hex;
use chain_clients_common::{ChainKind, TransferRecord};

use crate::payload::{identity_bytes, keccak256};

/// Script code hashes the mint outputs are built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CkbScriptConfig {
    /// Lock used for recipient cells (secp256k1-blake160 on mainnet).
    pub recipient_lock_code_hash: String,
    pub sudt_code_hash: String,
    /// Capacity of each minted sUDT cell, in shannons.
    #[serde(default = "default_sudt_cell_capacity")]
    pub sudt_cell_capacity: u64,
}

fn default_sudt_cell_capacity() -> u64 {
    142_0000_0000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptShape {
    pub code_hash: String,
    pub hash_type: String,
    pub args: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellShape {
    pub capacity: String,
    pub lock: ScriptShape,
    #[serde(rename = "type")]
    pub type_script: Option<ScriptShape>,
    pub data: String,
}

/// Unsigned outputs of a mint, plus the multisig nonce it consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTransaction {
    pub source_chain: ChainKind,
    pub nonce: u64,
    pub outputs: Vec<CellShape>,
}

/// sUDT type args identifying the bridged representation of `asset`.
pub fn sudt_owner_args(source_chain: ChainKind, asset: &str) -> String {
    let mut preimage = vec![source_chain.recipient_cell_code().unwrap_or(u8::MAX)];
    preimage.extend_from_slice(&identity_bytes(asset));
    format!("0x{}", hex::encode(keccak256(&preimage)))
}

/// Builds the mint outputs for `records`, in the order given.
pub fn build_mint_transaction(
    source_chain: ChainKind,
    records: &[TransferRecord],
    nonce: u64,
    scripts: &CkbScriptConfig,
) -> MintTransaction {
    let outputs = records
        .iter()
        .map(|record| CellShape {
            capacity: format!("0x{:x}", scripts.sudt_cell_capacity),
            lock: ScriptShape {
                code_hash: normalize_hex(&scripts.recipient_lock_code_hash),
                hash_type: "type".to_string(),
                args: normalize_hex(&record.recipient),
            },
            type_script: Some(ScriptShape {
                code_hash: normalize_hex(&scripts.sudt_code_hash),
                hash_type: "data".to_string(),
                args: sudt_owner_args(source_chain, &record.asset),
            }),
            data: format!("0x{}", hex::encode(record.amount.to_le_bytes())),
        })
        .collect();

    MintTransaction {
        source_chain,
        nonce,
        outputs,
    }
}
