//! Just enough Solidity ABI encoding for the bridge contract.

use sha3::{Digest, Keccak256};

use chain_clients_common::hex_utils::{be_bytes_to_u128, decode_hex};
use chain_clients_common::ChainError;

pub const LOCKED_EVENT: &str = "Locked(address,address,uint256,bytes,bytes)";
pub const UNLOCKED_EVENT: &str = "Unlocked(address,address,address,uint256,bytes)";
pub const UNLOCK_FN: &str = "unlock((address,address,uint256,bytes)[],uint256,bytes)";
pub const LOCK_ETH_FN: &str = "lockETH(bytes,bytes)";
pub const LOCK_TOKEN_FN: &str = "lockToken(address,uint256,bytes,bytes)";
pub const UNLOCK_NONCE_FN: &str = "latestUnlockNonce_()";

pub fn keccak(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// `0x`-prefixed topic hash of an event signature.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak(signature.as_bytes())))
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

// ============================================================================
// ENCODING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Uint(u128),
    Bytes(Vec<u8>),
    Array(Vec<Token>),
    Tuple(Vec<Token>),
}

impl Token {
    fn is_dynamic(&self) -> bool {
        match self {
            Token::Address(_) | Token::Uint(_) => false,
            Token::Bytes(_) | Token::Array(_) => true,
            Token::Tuple(items) => items.iter().any(Token::is_dynamic),
        }
    }
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn pad_right(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let rem = out.len() % 32;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(32 - rem));
    }
    out
}

/// Head/tail encoding of a token sequence.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
            tail.extend(encode_single(token));
        } else {
            head.extend(encode_single(token));
        }
    }
    head.extend(tail);
    head
}

fn encode_single(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(addr) => {
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(addr);
            word.to_vec()
        }
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::Bytes(data) => {
            let mut out = uint_word(data.len() as u128).to_vec();
            out.extend(pad_right(data));
            out
        }
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        }
        Token::Tuple(items) => encode(items),
    }
}

/// Calldata: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(args));
    out
}

pub fn parse_address(value: &str) -> Result<[u8; 20], ChainError> {
    let bytes = decode_hex(value)?;
    bytes
        .try_into()
        .map_err(|_| ChainError::Decode(format!("not a 20-byte address: {}", value)))
}

// ============================================================================
// DECODING
// ============================================================================

fn word(data: &[u8], index: usize) -> Result<&[u8], ChainError> {
    data.get(index * 32..index * 32 + 32)
        .ok_or_else(|| ChainError::Decode(format!("ABI data too short for word {}", index)))
}

pub fn decode_uint(data: &[u8], index: usize) -> Result<u128, ChainError> {
    be_bytes_to_u128(word(data, index)?)
}

/// Dynamic `bytes` whose offset sits in head word `index`.
pub fn decode_bytes(data: &[u8], index: usize) -> Result<Vec<u8>, ChainError> {
    let out_of_range = |what: &str| ChainError::Decode(format!("ABI bytes {} out of range", what));
    let offset = usize::try_from(decode_uint(data, index)?).map_err(|_| out_of_range("offset"))?;
    let start = offset.checked_add(32).ok_or_else(|| out_of_range("offset"))?;
    let len_word = data.get(offset..start).ok_or_else(|| out_of_range("offset"))?;
    let len = usize::try_from(be_bytes_to_u128(len_word)?).map_err(|_| out_of_range("length"))?;
    let end = start.checked_add(len).ok_or_else(|| out_of_range("length"))?;
    data.get(start..end)
        .map(|b| b.to_vec())
        .ok_or_else(|| out_of_range("length"))
}

/// Unsigned word at head index `index` that must fit in a `u64`.
pub fn decode_u64(data: &[u8], index: usize) -> Result<u64, ChainError> {
    let value = decode_uint(data, index)?;
    u64::try_from(value)
        .map_err(|_| ChainError::Decode(format!("ABI word {} does not fit in u64", value)))
}

/// Address held in an indexed topic.
pub fn topic_address(topic: &str) -> Result<String, ChainError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != 32 {
        return Err(ChainError::Decode(format!("topic is not 32 bytes: {}", topic)));
    }
    Ok(format!("0x{}", hex::encode(&bytes[12..])))
}
