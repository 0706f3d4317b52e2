//! Rows of the transfer ledger.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use chain_clients_common::hex_utils::normalize_hex;
use chain_clients_common::{ChainEvent, ChainKind, EventKind, TransferKind, TransferRecord};

/// Lifecycle of a mint or unlock.
///
/// `todo` → `pending` (claimed by a batch) → `success` | `error`. Pending rows
/// return to `todo` when a round fails to reach quorum or goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Todo,
    Pending,
    Success,
    Error,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Todo => "todo",
            TransferStatus::Pending => "pending",
            TransferStatus::Success => "success",
            TransferStatus::Error => "error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TransferStatus::Todo),
            "pending" => Ok(TransferStatus::Pending),
            "success" => Ok(TransferStatus::Success),
            "error" => Ok(TransferStatus::Error),
            other => Err(format!("unknown transfer status: {}", other)),
        }
    }
}

impl ToSql for TransferStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TransferStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

/// Amounts are stored as decimal text; SQLite integers stop at i64.
pub(crate) fn amount_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u128> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| conversion_error(idx, format!("invalid amount {}: {}", raw, e)))
}

pub(crate) fn chain_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<ChainKind> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

// ============================================================================
// SOURCE-SIDE RECORDS
// ============================================================================

/// A confirmed lock on a foreign chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// `txid#index`
    pub id: String,
    pub chain: ChainKind,
    pub tx_id: String,
    pub event_index: u32,
    pub block_height: u64,
    pub block_timestamp: i64,
    pub asset: String,
    pub amount: u128,
    pub sender: String,
    /// Home-ledger identity (lock args) that receives the mint.
    pub recipient: String,
    pub extra_data: String,
}

impl LockRecord {
    pub fn from_event(chain: ChainKind, event: &ChainEvent) -> Option<Self> {
        match &event.kind {
            EventKind::Lock {
                asset,
                amount,
                sender,
                recipient,
                extra_data,
            } => Some(Self {
                id: event.lock_id(),
                chain,
                tx_id: event.tx_id.clone(),
                event_index: event.index,
                block_height: event.block_height,
                block_timestamp: event.block_timestamp,
                asset: asset.clone(),
                amount: *amount,
                sender: sender.clone(),
                recipient: recipient.clone(),
                extra_data: extra_data.clone(),
            }),
            _ => None,
        }
    }
}

/// A confirmed burn on the home ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    /// Home-ledger transaction hash, normalized lowercase hex.
    pub tx_hash: String,
    pub destination: ChainKind,
    pub block_height: u64,
    pub block_timestamp: i64,
    pub asset: String,
    pub amount: u128,
    pub sender: String,
    pub recipient: String,
}

impl BurnRecord {
    pub fn from_event(event: &ChainEvent) -> Option<Self> {
        match &event.kind {
            EventKind::Burn {
                destination,
                asset,
                amount,
                sender,
                recipient,
            } => Some(Self {
                tx_hash: normalize_hex(&event.tx_id),
                destination: *destination,
                block_height: event.block_height,
                block_timestamp: event.block_timestamp,
                asset: asset.clone(),
                amount: *amount,
                sender: sender.clone(),
                recipient: recipient.clone(),
            }),
            _ => None,
        }
    }
}

// ============================================================================
// DESTINATION-SIDE RECORDS
// ============================================================================

/// A mint (keyed by lock id) or an unlock (keyed by burn hash).
///
/// `chain` is the foreign chain of the pair: the lock's chain for a mint,
/// the payout chain for an unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRecord {
    pub kind: TransferKind,
    pub id: String,
    pub chain: ChainKind,
    pub asset: String,
    pub recipient: String,
    /// Amount delivered, after the bridge fee.
    pub amount: u128,
    pub fee: u128,
    pub status: TransferStatus,
    pub message: Option<String>,
    pub nonce: Option<u64>,
    pub destination_tx: Option<String>,
    pub destination_timestamp: Option<i64>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Column list matching [`DestinationRecord::from_row`].
pub(crate) const DESTINATION_COLUMNS: &str = "id, chain, asset, recipient, amount, fee, status, \
     message, nonce, destination_tx, destination_timestamp, claimed_at, created_at, updated_at";

impl DestinationRecord {
    pub(crate) fn from_row(kind: TransferKind, row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind,
            id: row.get(0)?,
            chain: chain_col(row, 1)?,
            asset: row.get(2)?,
            recipient: row.get(3)?,
            amount: amount_col(row, 4)?,
            fee: amount_col(row, 5)?,
            status: row.get(6)?,
            message: row.get(7)?,
            nonce: row.get(8)?,
            destination_tx: row.get(9)?,
            destination_timestamp: row.get(10)?,
            claimed_at: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    /// The record as it appears in a signing proposal.
    pub fn transfer_record(&self) -> TransferRecord {
        TransferRecord {
            asset: self.asset.clone(),
            recipient: self.recipient.clone(),
            amount: self.amount,
            ref_id: self.id.clone(),
        }
    }
}

/// Origin transaction of a transfer, for user-facing summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginTx {
    pub chain: ChainKind,
    pub tx_id: String,
    pub sender: String,
    pub asset: String,
    pub amount: u128,
    pub timestamp: i64,
}

/// A destination record joined with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferView {
    pub origin: OriginTx,
    pub record: DestinationRecord,
}

/// Backlog of one (kind, chain) queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingWork {
    pub count: usize,
    pub oldest_created_at: Option<i64>,
}

/// Rows sharing one submitted destination transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedBatch {
    pub tx_hash: String,
    pub ids: Vec<String>,
}

/// Audit row written for every submitted multisig transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTxRecord {
    pub kind: TransferKind,
    pub chain: ChainKind,
    pub nonce: u64,
    pub payload_hash: String,
    pub tx_hash: String,
    pub ref_ids: Vec<String>,
    /// Signer addresses in submission order.
    pub signers: Vec<String>,
}

/// Sums over one (kind, chain, asset) flow, in the asset's base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowTotals {
    /// Source amounts (lock or burn) of transfers that completed.
    pub source_settled: u128,
    /// Delivered amounts of completed transfers.
    pub delivered: u128,
    /// Fees retained on completed transfers.
    pub fees: u128,
    /// Source amounts still `todo` or `pending`.
    pub in_flight: u128,
    /// Source amounts in `error`.
    pub failed: u128,
}
