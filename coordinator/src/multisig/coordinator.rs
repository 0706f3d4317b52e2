//! Propose, collect and submit cycle of the collector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use bridge_protocol::ckb_shape::{build_mint_transaction, CkbScriptConfig};
use bridge_protocol::{canonicalize, order_signatures, DomainSeparator, Proposal, SignError};
use chain_clients_common::{
    ChainClient, ChainError, ChainKind, SignedBatch, TransferKind, TransferRecord, TxStatus,
};

use super::collector::{collect_signatures, BlockedRecord, RetryPolicy};
use super::peers::SignatureSource;
use crate::config::MultisigConfig;
use crate::ledger::{DestinationRecord, Ledger, LedgerError, SignedTxRecord};

/// One OP_RETURN holds at most two burn hashes.
const MAX_BTC_UNLOCK_BATCH: usize = 2;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Protocol(#[from] SignError),
    #[error("{0} is not configured")]
    NotConfigured(ChainKind),
    #[error("failed to encode transaction: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Lifecycle of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Proposed,
    Collecting,
    Quorate,
    Submitted,
    Confirmed,
    Failed,
}

/// What a cycle ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing to do.
    Idle,
    /// Work exists but the batch gate is closed.
    Waiting { queued: usize },
    Confirmed { tx_hash: String, ids: Vec<String> },
    /// Submitted, confirmation still outstanding.
    Submitted { tx_hash: String, ids: Vec<String> },
    /// Quorum missed; rows went back to `todo`.
    QuorumFailed { ids: Vec<String>, signatures: usize },
    /// Rows marked `error`: submission attempts ran out, or verifiers refused
    /// every record in the batch.
    Failed { ids: Vec<String>, message: String },
    /// Rows an earlier, already confirmed submission turned out to cover.
    Settled { ids: Vec<String> },
}

/// How one proposal of a batch ended.
enum BatchRun {
    Finished(CycleOutcome),
    /// No quorum will sign these records; nothing was submitted.
    Blocked(Vec<BlockedRecord>),
}

struct Batch {
    id: uuid::Uuid,
    kind: TransferKind,
    chain: ChainKind,
    state: BatchState,
}

impl Batch {
    fn new(kind: TransferKind, chain: ChainKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            chain,
            state: BatchState::Proposed,
        }
    }

    fn advance(&mut self, next: BatchState) {
        info!(
            "Batch {} ({} on {}): {:?} -> {:?}",
            self.id, self.kind, self.chain, self.state, next
        );
        self.state = next;
    }
}

enum Confirmation {
    Confirmed(Option<i64>),
    Reverted,
    Outstanding,
}

/// Collector role: turns claimed ledger rows into quorum-signed destination
/// transactions.
pub struct MultisigCoordinator {
    ledger: Arc<Ledger>,
    clients: HashMap<ChainKind, Arc<dyn ChainClient>>,
    peers: Vec<Arc<dyn SignatureSource>>,
    domains: HashMap<ChainKind, DomainSeparator>,
    depths: HashMap<ChainKind, u64>,
    scripts: CkbScriptConfig,
    config: MultisigConfig,
    /// Single-flight guard per destination chain.
    flights: HashMap<ChainKind, Mutex<()>>,
}

impl MultisigCoordinator {
    /// # Arguments
    ///
    /// * `clients` - Every configured chain, home ledger included
    /// * `domains` - Signing domain per destination chain
    /// * `depths` - Confirmations a destination transaction needs to count as final
    pub fn new(
        ledger: Arc<Ledger>,
        clients: HashMap<ChainKind, Arc<dyn ChainClient>>,
        peers: Vec<Arc<dyn SignatureSource>>,
        domains: HashMap<ChainKind, DomainSeparator>,
        depths: HashMap<ChainKind, u64>,
        scripts: CkbScriptConfig,
        config: MultisigConfig,
    ) -> Self {
        let flights = clients.keys().map(|chain| (*chain, Mutex::new(()))).collect();
        Self {
            ledger,
            clients,
            peers,
            domains,
            depths,
            scripts,
            config,
            flights,
        }
    }

    fn client(&self, chain: ChainKind) -> Result<&Arc<dyn ChainClient>, CoordinatorError> {
        self.clients
            .get(&chain)
            .ok_or(CoordinatorError::NotConfigured(chain))
    }

    fn batch_limit(&self, kind: TransferKind, chain: ChainKind) -> usize {
        match (kind, chain) {
            (TransferKind::Unlock, ChainKind::Bitcoin) => {
                self.config.batch_size.min(MAX_BTC_UNLOCK_BATCH)
            }
            _ => self.config.batch_size,
        }
    }

    /// Runs one cycle for the `kind` queue of foreign chain `chain`.
    ///
    /// Mints go to the home ledger; unlocks go to `chain`. Cycles sharing a
    /// destination never overlap.
    pub async fn run_cycle(
        &self,
        kind: TransferKind,
        chain: ChainKind,
    ) -> Result<CycleOutcome, CoordinatorError> {
        let (source, destination) = match kind {
            TransferKind::Mint => (chain, ChainKind::Nervos),
            TransferKind::Unlock => (ChainKind::Nervos, chain),
        };
        let flight = self
            .flights
            .get(&destination)
            .ok_or(CoordinatorError::NotConfigured(destination))?;
        let _guard = flight.lock().await;
        let client = self.client(destination)?.clone();

        let now = chrono::Utc::now().timestamp_millis();
        self.ledger
            .reset_stale_pending(kind, chain, now - self.config.stale_pending_ms as i64)?;

        self.recheck_submitted(kind, chain, &client).await?;

        let limit = self.batch_limit(kind, chain);
        let work = self.ledger.pending_work(kind, chain)?;
        if work.count == 0 {
            return Ok(CycleOutcome::Idle);
        }
        let oldest_age = work.oldest_created_at.map_or(0, |created| now - created);
        if work.count < limit && oldest_age < self.config.max_wait_ms as i64 {
            return Ok(CycleOutcome::Waiting { queued: work.count });
        }

        let rows = self.ledger.claim_batch(kind, chain, limit)?;
        if rows.is_empty() {
            return Ok(CycleOutcome::Idle);
        }
        self.process_batch(kind, source, destination, chain, rows, &client)
            .await
    }

    /// Proposes `rows` until they settle. Records no quorum will sign are
    /// taken out and the rest proposed again at once, so one bad record
    /// cannot hold back the others. A record refused as invalid is marked
    /// `error`; one already signed into another batch is completed from that
    /// batch when it confirmed, and marked `error` otherwise.
    async fn process_batch(
        &self,
        kind: TransferKind,
        source: ChainKind,
        destination: ChainKind,
        chain: ChainKind,
        mut rows: Vec<DestinationRecord>,
        client: &Arc<dyn ChainClient>,
    ) -> Result<CycleOutcome, CoordinatorError> {
        let mut failed: Vec<String> = Vec::new();
        let mut settled: Vec<String> = Vec::new();
        let mut reasons: Vec<String> = Vec::new();
        loop {
            let blocked = match self
                .propose_batch(kind, source, destination, chain, &rows, client)
                .await?
            {
                BatchRun::Finished(outcome) => return Ok(outcome),
                BatchRun::Blocked(blocked) => blocked,
            };

            for record in &blocked {
                let ids: Vec<String> = rows
                    .iter()
                    .filter(|r| r.id.eq_ignore_ascii_case(&record.ref_id))
                    .map(|r| r.id.clone())
                    .collect();
                if record.signed_elsewhere
                    && self
                        .complete_from_earlier(kind, destination, client, &record.ref_id, &ids)
                        .await?
                {
                    settled.extend(ids);
                    continue;
                }
                let message = if record.signed_elsewhere {
                    format!(
                        "already signed into another batch ({}); check {} before retrying",
                        record.reason, destination
                    )
                } else {
                    format!("refused by verifiers: {}", record.reason)
                };
                error!("Quarantining {:?}: {}", ids, message);
                self.ledger.fail(kind, &ids, &message)?;
                failed.extend(ids);
                reasons.push(message);
            }

            rows.retain(|r| !failed.contains(&r.id) && !settled.contains(&r.id));
            if rows.is_empty() {
                if failed.is_empty() {
                    return Ok(CycleOutcome::Settled { ids: settled });
                }
                return Ok(CycleOutcome::Failed {
                    ids: failed,
                    message: reasons.join("; "),
                });
            }
            info!("Proposing the remaining {} rows again", rows.len());
        }
    }

    /// Completes `ids` from an earlier recorded submission of `ref_id` that
    /// has since confirmed. Returns whether one was found.
    async fn complete_from_earlier(
        &self,
        kind: TransferKind,
        destination: ChainKind,
        client: &Arc<dyn ChainClient>,
        ref_id: &str,
        ids: &[String],
    ) -> Result<bool, CoordinatorError> {
        let depth = self.depths.get(&destination).copied().unwrap_or(1);
        let earlier: Vec<SignedTxRecord> = self
            .ledger
            .signed_txs(destination)?
            .into_iter()
            .filter(|s| s.kind == kind && s.ref_ids.iter().any(|r| r.eq_ignore_ascii_case(ref_id)))
            .collect();
        for signed in earlier.iter().rev() {
            match client.transaction(&signed.tx_hash).await {
                Ok(Some(tx)) if tx.status != TxStatus::Failed && tx.is_confirmed(depth) => {
                    info!(
                        "{} was already paid by {} at nonce {}",
                        ref_id, signed.tx_hash, signed.nonce
                    );
                    self.ledger
                        .complete(kind, ids, &signed.tx_hash, tx.block_timestamp)?;
                    return Ok(true);
                }
                Ok(_) => {}
                Err(err) => warn!("Checking {} failed: {}", signed.tx_hash, err),
            }
        }
        Ok(false)
    }

    async fn propose_batch(
        &self,
        kind: TransferKind,
        source: ChainKind,
        destination: ChainKind,
        chain: ChainKind,
        rows: &[DestinationRecord],
        client: &Arc<dyn ChainClient>,
    ) -> Result<BatchRun, CoordinatorError> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let records = canonicalize(rows.iter().map(|r| r.transfer_record()).collect())?;
        let domain = *self
            .domains
            .get(&destination)
            .ok_or(CoordinatorError::NotConfigured(destination))?;

        let mut batch = Batch::new(kind, chain);
        info!("Batch {} claimed {} rows: {:?}", batch.id, ids.len(), ids);

        let mut last_error = String::new();
        for attempt in 1..=self.config.max_submit_attempts.max(1) {
            if attempt > 1 {
                batch.advance(BatchState::Proposed);
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }

            let nonce = match self.allocate_nonce(destination, client).await {
                Ok(nonce) => nonce,
                Err(err) => {
                    warn!("Batch {} could not read the nonce: {}", batch.id, err);
                    last_error = err.to_string();
                    continue;
                }
            };

            let proposal = self.propose(kind, source, destination, nonce, &records, &domain)?;
            let digest = proposal.claimed_digest()?;

            batch.advance(BatchState::Collecting);
            let collection = collect_signatures(
                &proposal,
                &digest,
                &self.peers,
                self.config.threshold,
                RetryPolicy::from(&self.config),
            )
            .await;
            if !collection.reached(self.config.threshold) {
                batch.advance(BatchState::Failed);
                warn!(
                    "Batch {} missed quorum ({}/{}): {:?}",
                    batch.id,
                    collection.signer_count(),
                    self.config.threshold,
                    collection.refusals
                );
                let blocked: Vec<BlockedRecord> = collection
                    .blocked_records(self.peers.len(), self.config.threshold)
                    .into_iter()
                    .filter(|b| ids.iter().any(|id| id.eq_ignore_ascii_case(&b.ref_id)))
                    .collect();
                if !blocked.is_empty() {
                    return Ok(BatchRun::Blocked(blocked));
                }
                self.ledger.release(kind, &ids)?;
                return Ok(BatchRun::Finished(CycleOutcome::QuorumFailed {
                    ids,
                    signatures: collection.signer_count(),
                }));
            }
            batch.advance(BatchState::Quorate);

            let signers: Vec<String> = {
                let mut s: Vec<String> =
                    collection.signatures.iter().map(|(a, _)| a.clone()).collect();
                s.sort();
                s
            };
            let signed = SignedBatch {
                kind,
                chain: destination,
                nonce,
                records: proposal.records.clone(),
                signatures: order_signatures(collection.signatures),
                raw_transaction: proposal.raw_transaction.clone(),
            };

            let tx_hash = match client.submit_multisig(&signed).await {
                Ok(tx_hash) => tx_hash,
                Err(err) => {
                    warn!(
                        "Batch {} submission {}/{} failed: {}",
                        batch.id, attempt, self.config.max_submit_attempts, err
                    );
                    last_error = err.to_string();
                    continue;
                }
            };
            batch.advance(BatchState::Submitted);
            self.ledger.mark_submitted(kind, &ids, nonce, &tx_hash)?;
            self.ledger.record_signature(&SignedTxRecord {
                kind,
                chain: destination,
                nonce,
                payload_hash: proposal.payload_hash.clone(),
                tx_hash: tx_hash.clone(),
                ref_ids: proposal.ref_ids(),
                signers,
            })?;

            match self.await_confirmation(client, destination, &tx_hash).await {
                Confirmation::Confirmed(timestamp) => {
                    self.ledger.complete(kind, &ids, &tx_hash, timestamp)?;
                    batch.advance(BatchState::Confirmed);
                    return Ok(BatchRun::Finished(CycleOutcome::Confirmed { tx_hash, ids }));
                }
                Confirmation::Outstanding => {
                    info!(
                        "Batch {} submitted as {}, confirmation pending",
                        batch.id, tx_hash
                    );
                    return Ok(BatchRun::Finished(CycleOutcome::Submitted { tx_hash, ids }));
                }
                Confirmation::Reverted => {
                    warn!("Batch {} transaction {} failed on chain", batch.id, tx_hash);
                    last_error = format!("transaction {} failed on {}", tx_hash, destination);
                }
            }
        }

        batch.advance(BatchState::Failed);
        error!(
            "Batch {} failed after {} attempts: {}",
            batch.id, self.config.max_submit_attempts, last_error
        );
        self.ledger.fail(kind, &ids, &last_error)?;
        Ok(BatchRun::Finished(CycleOutcome::Failed {
            ids,
            message: last_error,
        }))
    }

    /// Reads the replay nonce from the destination, or takes the next local
    /// one when the chain keeps none.
    async fn allocate_nonce(
        &self,
        destination: ChainKind,
        client: &Arc<dyn ChainClient>,
    ) -> Result<u64, CoordinatorError> {
        match client.multisig_nonce().await? {
            Some(nonce) => Ok(nonce),
            None => {
                let nonce = self.ledger.next_local_nonce(destination)?;
                self.ledger.commit_local_nonce(destination, nonce)?;
                Ok(nonce)
            }
        }
    }

    fn propose(
        &self,
        kind: TransferKind,
        source: ChainKind,
        destination: ChainKind,
        nonce: u64,
        records: &[TransferRecord],
        domain: &DomainSeparator,
    ) -> Result<Proposal, CoordinatorError> {
        let raw_transaction = match kind {
            TransferKind::Mint => Some(serde_json::to_value(build_mint_transaction(
                source,
                records,
                nonce,
                &self.scripts,
            ))?),
            TransferKind::Unlock => None,
        };
        Ok(Proposal::build(
            kind,
            source,
            destination,
            nonce,
            records.to_vec(),
            domain,
            raw_transaction,
        )?)
    }

    async fn await_confirmation(
        &self,
        client: &Arc<dyn ChainClient>,
        destination: ChainKind,
        tx_hash: &str,
    ) -> Confirmation {
        let depth = self.depths.get(&destination).copied().unwrap_or(1);
        let deadline = Instant::now() + Duration::from_millis(self.config.confirm_timeout_ms);
        let poll = Duration::from_millis(self.config.retry_delay_ms.max(100));
        loop {
            match client.transaction(tx_hash).await {
                Ok(Some(tx)) if tx.status == TxStatus::Failed => return Confirmation::Reverted,
                Ok(Some(tx)) if tx.is_confirmed(depth) => {
                    return Confirmation::Confirmed(tx.block_timestamp)
                }
                Ok(_) => {}
                Err(err) => warn!("Checking {} on {} failed: {}", tx_hash, destination, err),
            }
            if Instant::now() + poll > deadline {
                return Confirmation::Outstanding;
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Completes rows whose earlier submission has since confirmed.
    ///
    /// A submission that failed on chain goes back to `todo`. One the chain
    /// has never heard of stays `pending` for the operator: its nonce may
    /// still be consumed.
    async fn recheck_submitted(
        &self,
        kind: TransferKind,
        chain: ChainKind,
        client: &Arc<dyn ChainClient>,
    ) -> Result<(), CoordinatorError> {
        let depth = self.depths.get(&client.chain()).copied().unwrap_or(1);
        for submitted in self.ledger.submitted_awaiting_confirmation(kind, chain)? {
            match client.transaction(&submitted.tx_hash).await {
                Ok(Some(tx)) if tx.status == TxStatus::Failed => {
                    warn!(
                        "Submitted {} failed on chain, requeueing {:?}",
                        submitted.tx_hash, submitted.ids
                    );
                    self.ledger.release(kind, &submitted.ids)?;
                }
                Ok(Some(tx)) if tx.is_confirmed(depth) => {
                    info!("Submitted {} confirmed", submitted.tx_hash);
                    self.ledger
                        .complete(kind, &submitted.ids, &submitted.tx_hash, tx.block_timestamp)?;
                }
                Ok(Some(_)) => {}
                Ok(None) => warn!(
                    "Submitted {} not found on {}; rows {:?} stay pending",
                    submitted.tx_hash,
                    client.chain(),
                    submitted.ids
                ),
                Err(err) => warn!("Checking {} failed: {}", submitted.tx_hash, err),
            }
        }
        Ok(())
    }
}

// ============================================================================
// LOOPS
// ============================================================================

/// Runs mint cycles for every source chain in turn, forever. The home ledger
/// nonce is shared, so one loop serves all of them.
pub async fn run_mint_loop(coordinator: Arc<MultisigCoordinator>, sources: Vec<ChainKind>) {
    let interval = Duration::from_millis(coordinator.config.cycle_interval_ms);
    loop {
        for source in &sources {
            let result = coordinator.run_cycle(TransferKind::Mint, *source).await;
            log_cycle(result, TransferKind::Mint, *source);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Runs unlock cycles for one foreign chain, forever.
pub async fn run_unlock_loop(coordinator: Arc<MultisigCoordinator>, chain: ChainKind) {
    let interval = Duration::from_millis(coordinator.config.cycle_interval_ms);
    loop {
        let result = coordinator.run_cycle(TransferKind::Unlock, chain).await;
        log_cycle(result, TransferKind::Unlock, chain);
        tokio::time::sleep(interval).await;
    }
}

fn log_cycle(result: Result<CycleOutcome, CoordinatorError>, kind: TransferKind, chain: ChainKind) {
    match result {
        Ok(CycleOutcome::Idle) | Ok(CycleOutcome::Waiting { .. }) => {}
        Ok(outcome) => info!("{} cycle on {}: {:?}", kind, chain, outcome),
        Err(err) => error!("{} cycle on {} failed: {}", kind, chain, err),
    }
}
