//! Hex helpers used when decoding node responses.

use crate::client::ChainError;

pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Lowercase, `0x`-prefixed form of a hex string.
pub fn normalize_hex(value: &str) -> String {
    format!("0x{}", strip_0x(value).to_ascii_lowercase())
}

/// Parses an Ethereum-style quantity (`"0x1a"`).
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("invalid quantity {}: {}", value, e)))
}

pub fn encode_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub fn decode_hex(value: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(strip_0x(value))
        .map_err(|e| ChainError::Decode(format!("invalid hex {}: {}", value, e)))
}

/// Big-endian bytes of at most 32 bytes interpreted as `u128`.
///
/// Fails when the value does not fit, which for bridge amounts means the
/// event is malformed.
pub fn be_bytes_to_u128(bytes: &[u8]) -> Result<u128, ChainError> {
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 16 {
        return Err(ChainError::Decode("amount overflows u128".to_string()));
    }
    let mut buf = [0u8; 16];
    buf[16 - significant.len()..].copy_from_slice(&significant);
    Ok(u128::from_be_bytes(buf))
}
