//! OP_RETURN payload helpers and satoshi conversion.

use chain_clients_common::hex_utils::decode_hex;
use chain_clients_common::ChainError;

/// Prefix of the OP_RETURN payload written by unlock payouts.
pub const UNLOCK_MARKER: &[u8] = b"unlock";

/// Standard relay policy caps OP_RETURN payloads at 80 bytes.
pub const MAX_OP_RETURN_BYTES: usize = 80;

/// Burn hashes one payout can reference.
pub const MAX_SETTLEMENTS_PER_TX: usize = (MAX_OP_RETURN_BYTES - UNLOCK_MARKER.len()) / 32;

/// Recipient text longer than this is truncated.
pub const MAX_RECIPIENT_CHARS: usize = 46;

/// Extracts the pushed data of an OP_RETURN `scriptPubKey`.
///
/// Handles direct pushes and OP_PUSHDATA1; returns `None` for anything that
/// is not a nulldata script.
pub fn op_return_payload(script_hex: &str) -> Option<Vec<u8>> {
    let script = decode_hex(script_hex).ok()?;
    if script.first() != Some(&0x6a) {
        return None;
    }
    match *script.get(1)? {
        len @ 0x01..=0x4b => script.get(2..2 + len as usize).map(|d| d.to_vec()),
        0x4c => {
            let len = *script.get(2)? as usize;
            script.get(3..3 + len).map(|d| d.to_vec())
        }
        _ => None,
    }
}

/// Burn hashes named by an unlock payout's OP_RETURN, if it is one.
pub fn settlement_references(payload: &[u8]) -> Option<Vec<String>> {
    let rest = payload.strip_prefix(UNLOCK_MARKER)?;
    if rest.is_empty() || rest.len() % 32 != 0 || rest.len() / 32 > MAX_SETTLEMENTS_PER_TX {
        return None;
    }
    Some(
        rest.chunks(32)
            .map(|chunk| format!("0x{}", hex::encode(chunk)))
            .collect(),
    )
}

/// OP_RETURN payload for a payout settling `references`.
pub fn settlement_payload(references: &[String]) -> Result<Vec<u8>, ChainError> {
    if references.is_empty() || references.len() > MAX_SETTLEMENTS_PER_TX {
        return Err(ChainError::Rejected(format!(
            "a payout settles 1 to {} burns, got {}",
            MAX_SETTLEMENTS_PER_TX,
            references.len()
        )));
    }
    let mut payload = UNLOCK_MARKER.to_vec();
    for reference in references {
        let hash = decode_hex(reference)?;
        if hash.len() != 32 {
            return Err(ChainError::Decode(format!(
                "burn reference is not a 32-byte hash: {}",
                reference
            )));
        }
        payload.extend(hash);
    }
    Ok(payload)
}

/// Recipient text carried by a lock's OP_RETURN.
pub fn lock_recipient(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    let text: String = text.trim().chars().take(MAX_RECIPIENT_CHARS).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Parses a decimal BTC amount (as printed by bitcoind) into satoshis
/// without going through floating point.
pub fn btc_to_sats(value: &str) -> Result<u128, ChainError> {
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if frac.len() > 8 {
        return Err(ChainError::Decode(format!("too many decimals in {}", value)));
    }
    let whole: u128 = whole
        .parse()
        .map_err(|_| ChainError::Decode(format!("invalid BTC amount {}", value)))?;
    let frac_padded = format!("{:0<8}", frac);
    let frac: u128 = frac_padded
        .parse()
        .map_err(|_| ChainError::Decode(format!("invalid BTC amount {}", value)))?;
    Ok(whole * 100_000_000 + frac)
}

/// Satoshis of a `value` field, which bitcoind prints as a JSON number.
pub fn value_to_sats(value: &serde_json::Value) -> Result<u128, ChainError> {
    match value {
        serde_json::Value::String(s) => btc_to_sats(s),
        serde_json::Value::Number(n) => {
            let btc = n
                .as_f64()
                .ok_or_else(|| ChainError::Decode(format!("invalid BTC amount {}", n)))?;
            btc_to_sats(&format!("{:.8}", btc))
        }
        other => Err(ChainError::Decode(format!("invalid BTC amount {}", other))),
    }
}

pub fn sats_to_btc(sats: u128) -> String {
    format!("{}.{:08}", sats / 100_000_000, sats % 100_000_000)
}
