//! Signed payload store
//!
//! Persisted idempotency table of everything this verifier has signed. A
//! repeated request for the same payload hash gets the stored signature back,
//! and no reference is ever signed into two payloads that could both execute.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use chain_clients_common::{ChainKind, TransferKind};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS signed_payloads (
    payload_hash TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    chain TEXT NOT NULL,
    nonce INTEGER NOT NULL,
    ref_ids TEXT NOT NULL,
    signature TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signed_payloads_chain_nonce ON signed_payloads(chain, nonce);
CREATE TABLE IF NOT EXISTS signed_refs (
    chain TEXT NOT NULL,
    ref_id TEXT NOT NULL,
    payload_hash TEXT NOT NULL,
    nonce INTEGER NOT NULL,
    PRIMARY KEY (chain, ref_id, payload_hash)
);
";

/// One signature this verifier handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub payload_hash: String,
    pub kind: TransferKind,
    /// Destination chain of the signed batch.
    pub chain: ChainKind,
    pub nonce: u64,
    pub ref_ids: Vec<String>,
    /// 0x-prefixed 65-byte signature.
    pub signature: String,
    pub created_at: i64,
}

/// An earlier signing that covered a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorSigning {
    pub ref_id: String,
    pub payload_hash: String,
    pub nonce: u64,
}

pub struct SignedStore {
    conn: Mutex<Connection>,
}

impl SignedStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn find(&self, payload_hash: &str) -> Result<Option<SignedPayload>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT payload_hash, kind, chain, nonce, ref_ids, signature, created_at \
                 FROM signed_payloads WHERE payload_hash = ?1",
                params![payload_hash.to_ascii_lowercase()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((payload_hash, kind, chain, nonce, ref_ids, signature, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(SignedPayload {
            payload_hash,
            kind: kind.parse().map_err(StoreError::Corrupt)?,
            chain: chain.parse().map_err(StoreError::Corrupt)?,
            nonce: nonce as u64,
            ref_ids: serde_json::from_str(&ref_ids)?,
            signature,
            created_at,
        }))
    }

    /// Highest nonce signed for batches to `chain`.
    pub fn max_nonce(&self, chain: ChainKind) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(nonce) FROM signed_payloads WHERE chain = ?1",
            params![chain.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.map(|n| n as u64))
    }

    /// Earlier signings to `chain` that covered any of `ref_ids`.
    pub fn prior_signings(
        &self,
        chain: ChainKind,
        ref_ids: &[String],
    ) -> Result<Vec<PriorSigning>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ref_id, payload_hash, nonce FROM signed_refs WHERE chain = ?1 AND ref_id = ?2",
        )?;
        let mut prior = Vec::new();
        for ref_id in ref_ids {
            let rows = stmt.query_map(params![chain.as_str(), ref_id], |row| {
                Ok(PriorSigning {
                    ref_id: row.get(0)?,
                    payload_hash: row.get(1)?,
                    nonce: row.get::<_, i64>(2)? as u64,
                })
            })?;
            for row in rows {
                prior.push(row?);
            }
        }
        Ok(prior)
    }

    /// Persists a signature and its references. Returns false when the
    /// payload hash was already stored.
    pub fn insert(&self, signed: &SignedPayload) -> Result<bool, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let hash = signed.payload_hash.to_ascii_lowercase();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO signed_payloads \
             (payload_hash, kind, chain, nonce, ref_ids, signature, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                hash,
                signed.kind.as_str(),
                signed.chain.as_str(),
                signed.nonce as i64,
                serde_json::to_string(&signed.ref_ids)?,
                signed.signature,
                signed.created_at,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        for ref_id in &signed.ref_ids {
            tx.execute(
                "INSERT OR IGNORE INTO signed_refs (chain, ref_id, payload_hash, nonce) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![signed.chain.as_str(), ref_id, hash, signed.nonce as i64],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM signed_payloads", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
