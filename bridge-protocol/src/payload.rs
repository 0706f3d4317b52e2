//! Canonical signing payload.
//!
//! The digest follows EIP-712 structured hashing so the Ethereum bridge
//! contract can verify it with `ecrecover`:
//!
//! ```text
//! recordHash = keccak256(RECORD_TYPEHASH || keccak(asset) || keccak(recipient)
//!                        || u256(amount) || keccak(refId))
//! structHash = keccak256(typeHash || [u256(sourceChain)] || keccak(recordHash..) || u256(nonce))
//! digest     = keccak256(0x19 || 0x01 || domainSeparator || structHash)
//! ```
//!
//! `sourceChain` is only part of mint payloads; unlocks always originate on
//! the home ledger.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use chain_clients_common::hex_utils::strip_0x;
use chain_clients_common::{ChainKind, TransferKind, TransferRecord};

pub const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
pub const RECORD_TYPE: &str =
    "TransferRecord(bytes asset,bytes recipient,uint256 amount,bytes refId)";
pub const MINT_TYPE: &str = "Mint(uint256 sourceChain,TransferRecord[] records,uint256 nonce)TransferRecord(bytes asset,bytes recipient,uint256 amount,bytes refId)";
pub const UNLOCK_TYPE: &str = "Unlock(TransferRecord[] records,uint256 nonce)TransferRecord(bytes asset,bytes recipient,uint256 amount,bytes refId)";

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn u256_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Bytes an identity string contributes to the payload.
///
/// Hex identities (addresses, hashes, lock args) are hashed by value so that
/// `0xAB..` and `0xab..` sign identically; anything else (Bitcoin addresses,
/// native asset names) by its UTF-8 bytes.
pub fn identity_bytes(value: &str) -> Vec<u8> {
    if let Some(digits) = value.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(digits) {
            return bytes;
        }
    }
    value.as_bytes().to_vec()
}

pub fn type_hash(kind: TransferKind) -> [u8; 32] {
    match kind {
        TransferKind::Mint => keccak256(MINT_TYPE.as_bytes()),
        TransferKind::Unlock => keccak256(UNLOCK_TYPE.as_bytes()),
    }
}

pub fn record_hash(record: &TransferRecord) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 * 5);
    buf.extend_from_slice(&keccak256(RECORD_TYPE.as_bytes()));
    buf.extend_from_slice(&keccak256(&identity_bytes(&record.asset)));
    buf.extend_from_slice(&keccak256(&identity_bytes(&record.recipient)));
    buf.extend_from_slice(&u256_word(record.amount));
    buf.extend_from_slice(&keccak256(&identity_bytes(&record.ref_id)));
    keccak256(&buf)
}

// ============================================================================
// DOMAIN SEPARATOR
// ============================================================================

/// Per-destination domain parameters as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    /// Bridge contract address, or the multisig type hash on the home ledger.
    pub verifying_contract: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSeparator(pub [u8; 32]);

impl DomainSeparator {
    pub fn compute(config: &DomainConfig) -> Self {
        let contract = hex::decode(strip_0x(&config.verifying_contract)).unwrap_or_default();
        let mut contract_word = [0u8; 32];
        let take = contract.len().min(32);
        contract_word[32 - take..].copy_from_slice(&contract[contract.len() - take..]);

        let mut buf = Vec::with_capacity(32 * 5);
        buf.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        buf.extend_from_slice(&keccak256(config.name.as_bytes()));
        buf.extend_from_slice(&keccak256(config.version.as_bytes()));
        buf.extend_from_slice(&u256_word(config.chain_id as u128));
        buf.extend_from_slice(&contract_word);
        DomainSeparator(keccak256(&buf))
    }
}

impl From<&DomainConfig> for DomainSeparator {
    fn from(config: &DomainConfig) -> Self {
        DomainSeparator::compute(config)
    }
}

// ============================================================================
// DIGEST
// ============================================================================

/// Computes the digest verifiers sign.
///
/// `records` must already be in canonical order; see
/// [`crate::proposal::canonicalize`].
pub fn signing_digest(
    kind: TransferKind,
    source_chain: ChainKind,
    domain: &DomainSeparator,
    records: &[TransferRecord],
    nonce: u64,
) -> [u8; 32] {
    let mut concatenated = Vec::with_capacity(records.len() * 32);
    for record in records {
        concatenated.extend_from_slice(&record_hash(record));
    }

    let mut struct_buf = Vec::with_capacity(32 * 4);
    struct_buf.extend_from_slice(&type_hash(kind));
    if kind == TransferKind::Mint {
        let code = source_chain.recipient_cell_code().unwrap_or(u8::MAX);
        struct_buf.extend_from_slice(&u256_word(code as u128));
    }
    struct_buf.extend_from_slice(&keccak256(&concatenated));
    struct_buf.extend_from_slice(&u256_word(nonce as u128));
    let struct_hash = keccak256(&struct_buf);

    let mut buf = Vec::with_capacity(2 + 64);
    buf.push(0x19);
    buf.push(0x01);
    buf.extend_from_slice(&domain.0);
    buf.extend_from_slice(&struct_hash);
    keccak256(&buf)
}
