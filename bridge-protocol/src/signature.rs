//! ECDSA signature encoding and signer recovery.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use crate::payload::keccak256;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must be 65 bytes, got {0}")]
    Length(usize),
    #[error("invalid recovery byte {0}")]
    RecoveryByte(u8),
    #[error("malformed signature: {0}")]
    Malformed(String),
}

/// Ethereum-style address of a secp256k1 key: last 20 bytes of
/// keccak256 over the uncompressed point without its 0x04 tag.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recovers the signer address from an `r || s || v` signature over
/// `digest`. Accepts `v` as 27/28 or 0/1.
pub fn recover_signer(digest: &[u8; 32], signature: &[u8]) -> Result<String, SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::Length(signature.len()));
    }
    let v = signature[64];
    let recovery = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        other => return Err(SignatureError::RecoveryByte(other)),
    };
    let recovery_id =
        RecoveryId::try_from(recovery).map_err(|_| SignatureError::RecoveryByte(v))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    Ok(address_of(&key))
}

/// Orders signatures by ascending signer address, the order the bridge
/// contracts walk when checking for distinct signers.
pub fn order_signatures(mut signed: Vec<(String, Vec<u8>)>) -> Vec<Vec<u8>> {
    signed.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));
    signed.into_iter().map(|(_, sig)| sig).collect()
}

pub fn decode_signature_hex(value: &str) -> Result<Vec<u8>, SignatureError> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(raw).map_err(|e| SignatureError::Malformed(e.to_string()))
}
