//! Transfer ledger
//!
//! Persists locks, burns and the mints/unlocks they produce in SQLite. Every
//! operation runs in its own transaction; claims use `BEGIN IMMEDIATE` so two
//! collectors sharing a database never claim the same row.

mod records;

pub use records::{
    BurnRecord, DestinationRecord, FlowTotals, LockRecord, OriginTx, PendingWork, SignedTxRecord,
    SubmittedBatch, TransferStatus, TransferView,
};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, ToSql, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use bridge_protocol::Assessment;
use chain_clients_common::hex_utils::normalize_hex;
use chain_clients_common::{ChainKind, TransferKind};

use records::{amount_col, chain_col, DESTINATION_COLUMNS};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to encode ledger value: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
    #[error("{0} total overflows u128")]
    Overflow(&'static str),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lock_records (
    id              TEXT PRIMARY KEY,
    chain           TEXT NOT NULL,
    tx_id           TEXT NOT NULL,
    event_index     INTEGER NOT NULL,
    block_height    INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    asset           TEXT NOT NULL,
    amount          TEXT NOT NULL,
    sender          TEXT NOT NULL,
    recipient       TEXT NOT NULL,
    extra_data      TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lock_sender ON lock_records (chain, sender);

CREATE TABLE IF NOT EXISTS burn_records (
    id              TEXT PRIMARY KEY,
    chain           TEXT NOT NULL,
    block_height    INTEGER NOT NULL,
    block_timestamp INTEGER NOT NULL,
    asset           TEXT NOT NULL,
    amount          TEXT NOT NULL,
    sender          TEXT NOT NULL,
    recipient       TEXT NOT NULL,
    created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_burn_sender ON burn_records (chain, sender);

CREATE TABLE IF NOT EXISTS mint_records (
    id                    TEXT PRIMARY KEY,
    chain                 TEXT NOT NULL,
    asset                 TEXT NOT NULL,
    recipient             TEXT NOT NULL,
    amount                TEXT NOT NULL,
    fee                   TEXT NOT NULL,
    status                TEXT NOT NULL,
    message               TEXT,
    nonce                 INTEGER,
    destination_tx        TEXT,
    destination_timestamp INTEGER,
    claimed_at            INTEGER,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mint_status ON mint_records (chain, status, created_at);

CREATE TABLE IF NOT EXISTS unlock_records (
    id                    TEXT PRIMARY KEY,
    chain                 TEXT NOT NULL,
    asset                 TEXT NOT NULL,
    recipient             TEXT NOT NULL,
    amount                TEXT NOT NULL,
    fee                   TEXT NOT NULL,
    status                TEXT NOT NULL,
    message               TEXT,
    nonce                 INTEGER,
    destination_tx        TEXT,
    destination_timestamp INTEGER,
    claimed_at            INTEGER,
    created_at            INTEGER NOT NULL,
    updated_at            INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_unlock_status ON unlock_records (chain, status, created_at);

CREATE TABLE IF NOT EXISTS signed_txs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    kind         TEXT NOT NULL,
    chain        TEXT NOT NULL,
    nonce        INTEGER NOT NULL,
    payload_hash TEXT NOT NULL,
    tx_hash      TEXT NOT NULL,
    ref_ids      TEXT NOT NULL,
    signers      TEXT NOT NULL,
    created_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS watermarks (
    chain  TEXT PRIMARY KEY,
    height INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS local_nonces (
    chain      TEXT PRIMARY KEY,
    next_nonce INTEGER NOT NULL
);
"#;

fn table(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Mint => "mint_records",
        TransferKind::Unlock => "unlock_records",
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn normalize_ref(kind: TransferKind, id: &str) -> String {
    match kind {
        TransferKind::Mint => id.to_string(),
        TransferKind::Unlock => normalize_hex(id),
    }
}

/// SQLite-backed transfer ledger.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Opens (creating if needed) the ledger at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Inserts a lock and its mint in one transaction.
    ///
    /// Returns `false` when the lock id already exists, leaving both rows as
    /// they were. A rejected assessment still creates the mint, in `error`.
    pub fn create_lock_if_absent(
        &self,
        lock: &LockRecord,
        assessment: &Assessment,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO lock_records (id, chain, tx_id, event_index, block_height, \
             block_timestamp, asset, amount, sender, recipient, extra_data, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                lock.id,
                lock.chain.as_str(),
                lock.tx_id,
                lock.event_index,
                lock.block_height,
                lock.block_timestamp,
                lock.asset,
                lock.amount.to_string(),
                lock.sender,
                lock.recipient,
                lock.extra_data,
                now,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        insert_destination(
            &tx,
            TransferKind::Mint,
            &lock.id,
            lock.chain,
            &lock.asset,
            &lock.recipient,
            lock.amount,
            assessment,
            now,
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Inserts a burn and its unlock in one transaction; see
    /// [`Ledger::create_lock_if_absent`].
    pub fn create_burn_if_absent(
        &self,
        burn: &BurnRecord,
        assessment: &Assessment,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();
        let id = normalize_hex(&burn.tx_hash);
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO burn_records (id, chain, block_height, block_timestamp, asset, \
             amount, sender, recipient, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                burn.destination.as_str(),
                burn.block_height,
                burn.block_timestamp,
                burn.asset,
                burn.amount.to_string(),
                burn.sender,
                burn.recipient,
                now,
            ],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        insert_destination(
            &tx,
            TransferKind::Unlock,
            &id,
            burn.destination,
            &burn.asset,
            &burn.recipient,
            burn.amount,
            assessment,
            now,
        )?;
        tx.commit()?;
        Ok(true)
    }

    // ========================================================================
    // BATCH LIFECYCLE
    // ========================================================================

    /// Atomically moves up to `limit` `todo` rows of `(kind, chain)` to
    /// `pending` and returns exactly the rows this call changed, ordered by id.
    pub fn claim_batch(
        &self,
        kind: TransferKind,
        chain: ChainKind,
        limit: usize,
    ) -> Result<Vec<DestinationRecord>, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();
        let t = table(kind);

        let claimed: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "UPDATE {t} SET status = 'pending', claimed_at = ?1, updated_at = ?1 \
                 WHERE status = 'todo' AND id IN ( \
                     SELECT id FROM {t} WHERE chain = ?2 AND status = 'todo' \
                     ORDER BY created_at, id LIMIT ?3) \
                 RETURNING id"
            ))?;
            let ids = stmt.query_map(params![now, chain.as_str(), limit], |row| row.get(0))?;
            ids.collect::<Result<_, _>>()?
        };

        let mut rows = Vec::with_capacity(claimed.len());
        {
            let mut stmt = tx.prepare(&format!(
                "SELECT {DESTINATION_COLUMNS} FROM {t} WHERE id = ?1"
            ))?;
            for id in &claimed {
                rows.push(stmt.query_row([id], |row| DestinationRecord::from_row(kind, row))?);
            }
        }
        tx.commit()?;

        rows.sort_by(|a, b| a.id.cmp(&b.id));
        if !rows.is_empty() {
            debug!("Claimed {} {} rows for {}", rows.len(), kind, chain);
        }
        Ok(rows)
    }

    /// Number of `todo` rows and the creation time of the oldest.
    pub fn pending_work(
        &self,
        kind: TransferKind,
        chain: ChainKind,
    ) -> Result<PendingWork, LedgerError> {
        let conn = self.conn.lock();
        let (count, oldest): (usize, Option<i64>) = conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(created_at) FROM {} WHERE chain = ?1 AND status = 'todo'",
                table(kind)
            ),
            [chain.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(PendingWork {
            count,
            oldest_created_at: oldest,
        })
    }

    /// Records the destination transaction of claimed rows before it confirms.
    pub fn mark_submitted(
        &self,
        kind: TransferKind,
        ids: &[String],
        nonce: u64,
        tx_hash: &str,
    ) -> Result<usize, LedgerError> {
        self.update_each(
            kind,
            ids,
            "SET destination_tx = ?3, nonce = ?4, updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
            &[&tx_hash, &nonce],
        )
    }

    pub fn complete(
        &self,
        kind: TransferKind,
        ids: &[String],
        tx_hash: &str,
        timestamp: Option<i64>,
    ) -> Result<usize, LedgerError> {
        self.update_each(
            kind,
            ids,
            "SET status = 'success', message = NULL, destination_tx = ?3, \
             destination_timestamp = ?4, updated_at = ?2 WHERE id = ?1 AND status != 'success'",
            &[&tx_hash, &timestamp],
        )
    }

    pub fn fail(&self, kind: TransferKind, ids: &[String], message: &str) -> Result<usize, LedgerError> {
        self.update_each(
            kind,
            ids,
            "SET status = 'error', message = ?3, updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
            &[&message],
        )
    }

    /// Returns pending rows to `todo`, dropping any partial submission state.
    pub fn release(&self, kind: TransferKind, ids: &[String]) -> Result<usize, LedgerError> {
        self.update_each(
            kind,
            ids,
            "SET status = 'todo', claimed_at = NULL, destination_tx = NULL, nonce = NULL, \
             updated_at = ?2 WHERE id = ?1 AND status = 'pending'",
            &[],
        )
    }

    /// Operator retry: `error` rows go back to `todo`.
    pub fn retry_failed(&self, kind: TransferKind, ids: &[String]) -> Result<usize, LedgerError> {
        let changed = self.update_each(
            kind,
            ids,
            "SET status = 'todo', message = NULL, claimed_at = NULL, destination_tx = NULL, \
             nonce = NULL, updated_at = ?2 WHERE id = ?1 AND status = 'error'",
            &[],
        )?;
        info!("Requeued {} failed {} rows", changed, kind);
        Ok(changed)
    }

    /// Returns `pending` rows claimed before `claimed_before` (ms) and never
    /// submitted to `todo`. Rows with a destination hash are left for
    /// [`Ledger::submitted_awaiting_confirmation`].
    pub fn reset_stale_pending(
        &self,
        kind: TransferKind,
        chain: ChainKind,
        claimed_before: i64,
    ) -> Result<usize, LedgerError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = 'todo', claimed_at = NULL, nonce = NULL, updated_at = ?1 \
                 WHERE chain = ?2 AND status = 'pending' AND destination_tx IS NULL \
                 AND claimed_at < ?3",
                table(kind)
            ),
            params![now_ms(), chain.as_str(), claimed_before],
        )?;
        if changed > 0 {
            info!("Reset {} stale pending {} rows on {}", changed, kind, chain);
        }
        Ok(changed)
    }

    /// Pending rows that already have a destination transaction, grouped by it.
    pub fn submitted_awaiting_confirmation(
        &self,
        kind: TransferKind,
        chain: ChainKind,
    ) -> Result<Vec<SubmittedBatch>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT destination_tx, id FROM {} WHERE chain = ?1 AND status = 'pending' \
             AND destination_tx IS NOT NULL ORDER BY destination_tx, id",
            table(kind)
        ))?;
        let rows = stmt.query_map([chain.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut batches: Vec<SubmittedBatch> = Vec::new();
        for row in rows {
            let (tx_hash, id) = row?;
            match batches.last_mut() {
                Some(batch) if batch.tx_hash == tx_hash => batch.ids.push(id),
                _ => batches.push(SubmittedBatch {
                    tx_hash,
                    ids: vec![id],
                }),
            }
        }
        Ok(batches)
    }

    /// Marks the unlock of `burn_tx_hash` settled by `settlement_tx`.
    ///
    /// Only a `pending` unlock completes, and only when its recorded
    /// submission is `settlement_tx` or none was recorded yet (the collector
    /// stopped between submitting and recording). A `todo` or `error` row was
    /// never handed to the custody, so a marker for it proves nothing.
    /// Returns `true` if the row changed.
    pub fn confirm_settlement(
        &self,
        burn_tx_hash: &str,
        settlement_tx: &str,
        timestamp: i64,
    ) -> Result<bool, LedgerError> {
        let changed = self.update_each(
            TransferKind::Unlock,
            &[normalize_hex(burn_tx_hash)],
            "SET status = 'success', message = NULL, destination_tx = ?3, \
             destination_timestamp = ?4, updated_at = ?2 WHERE id = ?1 AND status = 'pending' \
             AND (destination_tx IS NULL OR lower(destination_tx) = lower(?3))",
            &[&settlement_tx, &timestamp],
        )?;
        Ok(changed > 0)
    }

    /// Runs `UPDATE <table> <clause>` once per id. `?1` binds the id, `?2`
    /// the current time, and `?3..` the `extra` values.
    fn update_each(
        &self,
        kind: TransferKind,
        ids: &[String],
        clause: &str,
        extra: &[&dyn ToSql],
    ) -> Result<usize, LedgerError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_ms();
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(&format!("UPDATE {} {}", table(kind), clause))?;
            for id in ids {
                let id = normalize_ref(kind, id);
                let mut bound: Vec<&dyn ToSql> = vec![&id, &now];
                bound.extend_from_slice(extra);
                changed += stmt.execute(bound.as_slice())?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    // ========================================================================
    // LOOKUPS
    // ========================================================================

    pub fn get(&self, kind: TransferKind, id: &str) -> Result<Option<DestinationRecord>, LedgerError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {DESTINATION_COLUMNS} FROM {} WHERE id = ?1", table(kind)),
                [normalize_ref(kind, id)],
                |row| DestinationRecord::from_row(kind, row),
            )
            .optional()?;
        Ok(record)
    }

    pub fn records_with_status(
        &self,
        kind: TransferKind,
        status: TransferStatus,
    ) -> Result<Vec<DestinationRecord>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DESTINATION_COLUMNS} FROM {} WHERE status = ?1 ORDER BY id",
            table(kind)
        ))?;
        let rows = stmt.query_map([status], |row| DestinationRecord::from_row(kind, row))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    // ========================================================================
    // SIGNED TRANSACTIONS, WATERMARKS AND NONCES
    // ========================================================================

    pub fn record_signature(&self, record: &SignedTxRecord) -> Result<(), LedgerError> {
        let ref_ids = serde_json::to_string(&record.ref_ids)?;
        let signers = serde_json::to_string(&record.signers)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signed_txs (kind, chain, nonce, payload_hash, tx_hash, ref_ids, signers, \
             created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.kind.as_str(),
                record.chain.as_str(),
                record.nonce,
                record.payload_hash,
                record.tx_hash,
                ref_ids,
                signers,
                now_ms(),
            ],
        )?;
        Ok(())
    }

    pub fn signed_txs(&self, chain: ChainKind) -> Result<Vec<SignedTxRecord>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, chain, nonce, payload_hash, tx_hash, ref_ids, signers FROM signed_txs \
             WHERE chain = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([chain.as_str()], |row| {
            let kind: String = row.get(0)?;
            Ok((
                kind,
                chain_col(row, 1)?,
                row.get::<_, u64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (kind, chain, nonce, payload_hash, tx_hash, ref_ids, signers) = row?;
            records.push(SignedTxRecord {
                kind: kind.parse().map_err(LedgerError::Corrupt)?,
                chain,
                nonce,
                payload_hash,
                tx_hash,
                ref_ids: serde_json::from_str(&ref_ids)?,
                signers: serde_json::from_str(&signers)?,
            });
        }
        Ok(records)
    }

    pub fn watermark(&self, chain: ChainKind) -> Result<Option<u64>, LedgerError> {
        let conn = self.conn.lock();
        let height = conn
            .query_row(
                "SELECT height FROM watermarks WHERE chain = ?1",
                [chain.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height)
    }

    pub fn set_watermark(&self, chain: ChainKind, height: u64) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO watermarks (chain, height) VALUES (?1, ?2) \
             ON CONFLICT(chain) DO UPDATE SET height = excluded.height",
            params![chain.as_str(), height],
        )?;
        Ok(())
    }

    /// Next nonce for a chain that keeps none on chain. Starts at 1.
    pub fn next_local_nonce(&self, chain: ChainKind) -> Result<u64, LedgerError> {
        let conn = self.conn.lock();
        let next: Option<u64> = conn
            .query_row(
                "SELECT next_nonce FROM local_nonces WHERE chain = ?1",
                [chain.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(next.unwrap_or(1))
    }

    /// Marks `nonce` as used; the counter never moves backwards.
    pub fn commit_local_nonce(&self, chain: ChainKind, nonce: u64) -> Result<(), LedgerError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO local_nonces (chain, next_nonce) VALUES (?1, ?2) \
             ON CONFLICT(chain) DO UPDATE SET next_nonce = MAX(next_nonce, excluded.next_nonce)",
            params![chain.as_str(), nonce + 1],
        )?;
        Ok(())
    }

    // ========================================================================
    // SUMMARIES AND RECONCILIATION
    // ========================================================================

    /// Transfers on `chain` for `asset` whose origin was sent by `ident`.
    pub fn summaries_for_sender(
        &self,
        chain: ChainKind,
        ident: &str,
        asset: &str,
    ) -> Result<Vec<TransferView>, LedgerError> {
        let mut views = self.views(
            TransferKind::Mint,
            chain,
            "lower(o.sender) = lower(?2) AND lower(d.asset) = lower(?3)",
            ident,
            asset,
        )?;
        views.extend(self.views(
            TransferKind::Unlock,
            chain,
            "lower(o.sender) = lower(?2) AND lower(d.asset) = lower(?3)",
            ident,
            asset,
        )?);
        Ok(views)
    }

    /// Transfers on `chain` for `asset` delivered to `ident`.
    pub fn summaries_for_recipient(
        &self,
        chain: ChainKind,
        ident: &str,
        asset: &str,
    ) -> Result<Vec<TransferView>, LedgerError> {
        let mut views = self.views(
            TransferKind::Mint,
            chain,
            "lower(d.recipient) = lower(?2) AND lower(d.asset) = lower(?3)",
            ident,
            asset,
        )?;
        views.extend(self.views(
            TransferKind::Unlock,
            chain,
            "lower(d.recipient) = lower(?2) AND lower(d.asset) = lower(?3)",
            ident,
            asset,
        )?);
        Ok(views)
    }

    fn views(
        &self,
        kind: TransferKind,
        chain: ChainKind,
        filter: &str,
        ident: &str,
        asset: &str,
    ) -> Result<Vec<TransferView>, LedgerError> {
        let (origin_table, origin_tx, origin_chain) = match kind {
            TransferKind::Mint => ("lock_records", "o.tx_id", chain),
            TransferKind::Unlock => ("burn_records", "o.id", ChainKind::Nervos),
        };
        let columns = DESTINATION_COLUMNS
            .split(", ")
            .map(|c| format!("d.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns}, {origin_tx}, o.sender, o.asset, o.amount, o.block_timestamp \
             FROM {} d JOIN {origin_table} o ON o.id = d.id \
             WHERE d.chain = ?1 AND {filter} ORDER BY d.created_at DESC, d.id",
            table(kind)
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![chain.as_str(), ident, asset], |row| {
            Ok(TransferView {
                record: DestinationRecord::from_row(kind, row)?,
                origin: OriginTx {
                    chain: origin_chain,
                    tx_id: row.get(14)?,
                    sender: row.get(15)?,
                    asset: row.get(16)?,
                    amount: amount_col(row, 17)?,
                    timestamp: row.get(18)?,
                },
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Every (foreign chain, asset) pair with at least one transfer.
    pub fn tracked_assets(&self) -> Result<Vec<(ChainKind, String)>, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chain, asset FROM mint_records UNION SELECT chain, asset FROM unlock_records \
             ORDER BY 1, 2",
        )?;
        let rows = stmt.query_map([], |row| Ok((chain_col(row, 0)?, row.get(1)?)))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Lock-to-mint sums for one foreign chain and asset.
    pub fn inbound_totals(&self, chain: ChainKind, asset: &str) -> Result<FlowTotals, LedgerError> {
        self.flow_totals(TransferKind::Mint, "lock_records", chain, asset)
    }

    /// Burn-to-unlock sums for one foreign chain and asset.
    pub fn outbound_totals(&self, chain: ChainKind, asset: &str) -> Result<FlowTotals, LedgerError> {
        self.flow_totals(TransferKind::Unlock, "burn_records", chain, asset)
    }

    fn flow_totals(
        &self,
        kind: TransferKind,
        origin_table: &str,
        chain: ChainKind,
        asset: &str,
    ) -> Result<FlowTotals, LedgerError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT d.status, o.amount, d.amount, d.fee FROM {} d \
             JOIN {origin_table} o ON o.id = d.id WHERE d.chain = ?1 AND d.asset = ?2",
            table(kind)
        ))?;
        let rows = stmt.query_map(params![chain.as_str(), asset], |row| {
            Ok((
                row.get::<_, TransferStatus>(0)?,
                amount_col(row, 1)?,
                amount_col(row, 2)?,
                amount_col(row, 3)?,
            ))
        })?;

        let mut totals = FlowTotals::default();
        for row in rows {
            let (status, source, delivered, fee) = row?;
            match status {
                TransferStatus::Success => {
                    add_to(&mut totals.source_settled, source, "settled")?;
                    add_to(&mut totals.delivered, delivered, "delivered")?;
                    add_to(&mut totals.fees, fee, "fee")?;
                }
                TransferStatus::Todo | TransferStatus::Pending => {
                    add_to(&mut totals.in_flight, source, "in-flight")?
                }
                TransferStatus::Error => add_to(&mut totals.failed, source, "failed")?,
            }
        }
        Ok(totals)
    }
}

fn add_to(total: &mut u128, amount: u128, what: &'static str) -> Result<(), LedgerError> {
    *total = total.checked_add(amount).ok_or(LedgerError::Overflow(what))?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_destination(
    tx: &rusqlite::Transaction<'_>,
    kind: TransferKind,
    id: &str,
    chain: ChainKind,
    asset: &str,
    recipient: &str,
    source_amount: u128,
    assessment: &Assessment,
    now: i64,
) -> Result<(), LedgerError> {
    let (status, amount, fee, message) = match assessment {
        Assessment::Accepted { fee, net } => (TransferStatus::Todo, *net, *fee, None),
        Assessment::Rejected { reason } => {
            (TransferStatus::Error, source_amount, 0, Some(reason.as_str()))
        }
    };
    tx.execute(
        &format!(
            "INSERT INTO {} (id, chain, asset, recipient, amount, fee, status, message, \
             created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            table(kind)
        ),
        params![
            id,
            chain.as_str(),
            asset,
            recipient,
            amount.to_string(),
            fee.to_string(),
            status,
            message,
            now,
        ],
    )?;
    Ok(())
}
