//! Chain-neutral data model shared by every client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CHAIN IDENTITY
// ============================================================================

/// Chains the relay knows about.
///
/// `Nervos` is the home ledger; the others are foreign chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    Nervos,
    Ethereum,
    Bitcoin,
}

impl ChainKind {
    /// Chain byte used inside the home-ledger recipient cell.
    ///
    /// Returns `None` for the home ledger itself, which never appears as a
    /// burn destination.
    pub fn recipient_cell_code(&self) -> Option<u8> {
        match self {
            ChainKind::Bitcoin => Some(0),
            ChainKind::Ethereum => Some(1),
            ChainKind::Nervos => None,
        }
    }

    /// Inverse of [`ChainKind::recipient_cell_code`].
    pub fn from_recipient_cell_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ChainKind::Bitcoin),
            1 => Some(ChainKind::Ethereum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKind::Nervos => "nervos",
            ChainKind::Ethereum => "ethereum",
            ChainKind::Bitcoin => "bitcoin",
        }
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nervos" | "ckb" => Ok(ChainKind::Nervos),
            "ethereum" | "eth" => Ok(ChainKind::Ethereum),
            "bitcoin" | "btc" => Ok(ChainKind::Bitcoin),
            other => Err(format!("unknown chain: {}", other)),
        }
    }
}

/// Direction of a relayed transfer as seen from the destination chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Lock on a foreign chain, mint on the home ledger.
    Mint,
    /// Burn on the home ledger, unlock on a foreign chain.
    Unlock,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Mint => "mint",
            TransferKind::Unlock => "unlock",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mint" => Ok(TransferKind::Mint),
            "unlock" => Ok(TransferKind::Unlock),
            other => Err(format!("unknown transfer kind: {}", other)),
        }
    }
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Serde adapter that writes `u128` amounts as decimal strings.
///
/// JSON numbers lose precision above 2^53 in most clients, so every amount
/// on the wire is a string.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// OBSERVED CHAIN DATA
// ============================================================================

/// Bridge-relevant payload of one on-chain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    /// Funds entered bridge custody on a foreign chain.
    Lock {
        asset: String,
        #[serde(with = "amount_string")]
        amount: u128,
        sender: String,
        /// Home-ledger identity that receives the mint.
        recipient: String,
        #[serde(default)]
        extra_data: String,
    },
    /// Home-ledger representation destroyed, requesting an unlock.
    Burn {
        destination: ChainKind,
        asset: String,
        #[serde(with = "amount_string")]
        amount: u128,
        sender: String,
        recipient: String,
    },
    /// A destination transaction that settles the burn named by `reference`.
    Settlement { reference: String },
}

/// One decoded event with its position on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub tx_id: String,
    /// Log index or output index inside the transaction.
    pub index: u32,
    pub block_height: u64,
    pub block_timestamp: i64,
    pub kind: EventKind,
}

impl ChainEvent {
    /// Ledger identifier of a lock event: `txid#index`.
    pub fn lock_id(&self) -> String {
        format!("{}#{}", self.tx_id, self.index)
    }
}

/// A block reduced to the bridge events it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBlock {
    pub height: u64,
    pub hash: String,
    pub timestamp: i64,
    pub events: Vec<ChainEvent>,
    /// Block holds nothing but the coinbase/cellbase transaction.
    pub system_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Committed,
    Failed,
}

/// A transaction looked up by id, with its confirmation depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTransaction {
    pub tx_id: String,
    pub block_height: Option<u64>,
    pub block_timestamp: Option<i64>,
    /// Number of blocks from the including block to the tip, inclusive.
    pub confirmations: u64,
    pub status: TxStatus,
    pub events: Vec<ChainEvent>,
}

impl ObservedTransaction {
    pub fn is_confirmed(&self, depth: u64) -> bool {
        self.status == TxStatus::Committed && self.confirmations >= depth
    }
}

// ============================================================================
// DESTINATION TRANSFERS
// ============================================================================

/// One payout inside a destination transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub asset: String,
    pub recipient: String,
    #[serde(with = "amount_string")]
    pub amount: u128,
    /// Source reference: lock id for mints, burn tx hash for unlocks.
    pub ref_id: String,
}

/// A quorum-authorized batch ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedBatch {
    pub kind: TransferKind,
    pub chain: ChainKind,
    pub nonce: u64,
    pub records: Vec<TransferRecord>,
    /// Signatures already in the order the destination expects.
    pub signatures: Vec<Vec<u8>>,
    #[serde(default)]
    pub raw_transaction: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_kind_parses_short_names() {
        assert_eq!("ckb".parse::<ChainKind>().unwrap(), ChainKind::Nervos);
        assert_eq!("ETH".parse::<ChainKind>().unwrap(), ChainKind::Ethereum);
        assert_eq!("btc".parse::<ChainKind>().unwrap(), ChainKind::Bitcoin);
        assert!("dogecoin".parse::<ChainKind>().is_err());
    }

    #[test]
    fn recipient_cell_codes_match_home_ledger_layout() {
        assert_eq!(ChainKind::Bitcoin.recipient_cell_code(), Some(0));
        assert_eq!(ChainKind::Ethereum.recipient_cell_code(), Some(1));
        assert_eq!(ChainKind::Nervos.recipient_cell_code(), None);
        assert_eq!(ChainKind::from_recipient_cell_code(7), None);
    }

    #[test]
    fn amounts_serialize_as_strings() {
        let record = TransferRecord {
            asset: "0x0000000000000000000000000000000000000000".into(),
            recipient: "0xabc".into(),
            amount: u128::MAX,
            ref_id: "0x01#0".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["amount"], serde_json::json!(u128::MAX.to_string()));
        let back: TransferRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
