//! Molecule codecs for the two structures the relay reads and writes.
//!
//! ```text
//! table RecipientCellData {
//!     recipient_address:     Bytes,
//!     chain:                 byte,
//!     asset:                 Bytes,
//!     bridge_lock_code_hash: Byte32,
//!     owner_lock_hash:       Byte32,
//!     amount:                Uint128,
//!     fee:                   Uint128,
//! }
//! ```

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoleculeError {
    #[error("buffer too short: need {need}, have {have}")]
    TooShort { need: usize, have: usize },
    #[error("header declares {declared} bytes but buffer has {actual}")]
    SizeMismatch { declared: usize, actual: usize },
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("field {field} has invalid length {len}")]
    FieldLength { field: &'static str, len: usize },
    #[error("field offsets are not increasing")]
    Offsets,
}

fn read_u32(data: &[u8], at: usize) -> Result<usize, MoleculeError> {
    let bytes = data.get(at..at + 4).ok_or(MoleculeError::TooShort {
        need: at + 4,
        have: data.len(),
    })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
}

/// Splits a molecule table into its raw field slices.
fn table_fields(data: &[u8], expected: usize) -> Result<Vec<&[u8]>, MoleculeError> {
    let total = read_u32(data, 0)?;
    if total != data.len() {
        return Err(MoleculeError::SizeMismatch {
            declared: total,
            actual: data.len(),
        });
    }
    let first_offset = read_u32(data, 4)?;
    let count = first_offset / 4 - 1;
    if count != expected {
        return Err(MoleculeError::FieldCount {
            expected,
            found: count,
        });
    }
    let mut offsets = Vec::with_capacity(count + 1);
    for i in 0..count {
        offsets.push(read_u32(data, 4 + i * 4)?);
    }
    offsets.push(total);
    if offsets.windows(2).any(|w| w[0] > w[1]) {
        return Err(MoleculeError::Offsets);
    }
    Ok(offsets.windows(2).map(|w| &data[w[0]..w[1]]).collect())
}

fn encode_table(fields: &[Vec<u8>]) -> Vec<u8> {
    let header = 4 * (fields.len() + 1);
    let total = header + fields.iter().map(Vec::len).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend((total as u32).to_le_bytes());
    let mut offset = header;
    for field in fields {
        out.extend((offset as u32).to_le_bytes());
        offset += field.len();
    }
    for field in fields {
        out.extend(field);
    }
    out
}

fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut out = (data.len() as u32).to_le_bytes().to_vec();
    out.extend(data);
    out
}

fn decode_bytes(field: &'static str, raw: &[u8]) -> Result<Vec<u8>, MoleculeError> {
    let len = read_u32(raw, 0)?;
    if raw.len() != 4 + len {
        return Err(MoleculeError::FieldLength {
            field,
            len: raw.len(),
        });
    }
    Ok(raw[4..].to_vec())
}

fn fixed<const N: usize>(field: &'static str, raw: &[u8]) -> Result<[u8; N], MoleculeError> {
    raw.try_into().map_err(|_| MoleculeError::FieldLength {
        field,
        len: raw.len(),
    })
}

// ============================================================================
// RECIPIENT CELL DATA
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientCellData {
    pub recipient_address: Vec<u8>,
    pub chain: u8,
    pub asset: Vec<u8>,
    pub bridge_lock_code_hash: [u8; 32],
    pub owner_lock_hash: [u8; 32],
    pub amount: u128,
    pub fee: u128,
}

impl RecipientCellData {
    pub fn encode(&self) -> Vec<u8> {
        encode_table(&[
            encode_bytes(&self.recipient_address),
            vec![self.chain],
            encode_bytes(&self.asset),
            self.bridge_lock_code_hash.to_vec(),
            self.owner_lock_hash.to_vec(),
            self.amount.to_le_bytes().to_vec(),
            self.fee.to_le_bytes().to_vec(),
        ])
    }

    pub fn decode(data: &[u8]) -> Result<Self, MoleculeError> {
        let fields = table_fields(data, 7)?;
        Ok(Self {
            recipient_address: decode_bytes("recipient_address", fields[0])?,
            chain: fixed::<1>("chain", fields[1])?[0],
            asset: decode_bytes("asset", fields[2])?,
            bridge_lock_code_hash: fixed("bridge_lock_code_hash", fields[3])?,
            owner_lock_hash: fixed("owner_lock_hash", fields[4])?,
            amount: u128::from_le_bytes(fixed("amount", fields[5])?),
            fee: u128::from_le_bytes(fixed("fee", fields[6])?),
        })
    }
}

// ============================================================================
// WITNESS ARGS
// ============================================================================

/// `WitnessArgs` carrying only a lock field, which holds the concatenated
/// multisig signatures.
pub fn witness_args_with_lock(lock: &[u8]) -> Vec<u8> {
    encode_table(&[encode_bytes(lock), Vec::new(), Vec::new()])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RecipientCellData {
        RecipientCellData {
            recipient_address: b"0x2222222222222222222222222222222222222222".to_vec(),
            chain: 1,
            asset: vec![0u8; 20],
            bridge_lock_code_hash: [3u8; 32],
            owner_lock_hash: [4u8; 32],
            amount: 100_000_000,
            fee: 1_000,
        }
    }

    #[test]
    fn recipient_cell_data_decodes_what_it_encodes() {
        let data = sample();
        assert_eq!(RecipientCellData::decode(&data.encode()).unwrap(), data);
    }

    #[test]
    fn header_size_is_checked() {
        let mut encoded = sample().encode();
        encoded.push(0);
        assert!(matches!(
            RecipientCellData::decode(&encoded),
            Err(MoleculeError::SizeMismatch { .. })
        ));
        assert!(RecipientCellData::decode(&[1, 2]).is_err());
    }

    #[test]
    fn witness_args_layout() {
        let witness = witness_args_with_lock(&[0xaa; 65]);
        // header 16 bytes + bytes(4 + 65) + two empty options
        assert_eq!(witness.len(), 16 + 69);
        assert_eq!(read_u32(&witness, 0).unwrap(), witness.len());
        assert_eq!(read_u32(&witness, 8).unwrap(), witness.len());
        assert_eq!(read_u32(&witness, 12).unwrap(), witness.len());
    }
}
