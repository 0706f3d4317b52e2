//! Chain watchers
//!
//! One watcher per chain turns confirmed on-chain events into ledger rows.
//! Account-model chains are scanned with range log queries, UTXO chains (and
//! the home ledger) block by block. Both advance the stored watermark only
//! after every event up to it has been written, so a restart replays at most
//! the last unfinished range and ingestion stays idempotent.

mod account;
mod utxo;

pub use account::AccountWatcher;
pub use utxo::UtxoWatcher;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use bridge_protocol::FeeTable;
use chain_clients_common::{ChainClient, ChainError, ChainEvent, ChainKind, EventKind};

use crate::config::WatcherConfig;
use crate::ledger::{BurnRecord, Ledger, LedgerError, LockRecord};

#[derive(Debug, Error)]
pub enum WatchError {
    /// Worth retrying: RPC hiccups, a busy database.
    #[error("transient watcher error: {0}")]
    Transient(String),
    /// Needs an operator, e.g. the watermark fell behind the prune horizon.
    #[error("fatal watcher error: {0}")]
    Fatal(String),
}

impl From<ChainError> for WatchError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Pruned { .. } | ChainError::Unsupported(_) => {
                WatchError::Fatal(err.to_string())
            }
            other => WatchError::Transient(other.to_string()),
        }
    }
}

impl From<LedgerError> for WatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Corrupt(_) => WatchError::Fatal(err.to_string()),
            other => WatchError::Transient(other.to_string()),
        }
    }
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollProgress {
    /// New watermark, if any height was finished.
    pub scanned_to: Option<u64>,
    /// Lock or burn rows created.
    pub created: usize,
    /// Unlocks marked settled from destination markers.
    pub settled: usize,
}

#[async_trait]
pub trait ChainWatcher: Send + Sync {
    fn chain(&self) -> ChainKind;

    /// Scans every confirmed height above the watermark once.
    async fn poll_once(&self) -> Result<PollProgress, WatchError>;
}

// ============================================================================
// SHARED INGESTION
// ============================================================================

/// Writes decoded events of one chain into the ledger.
pub(crate) struct EventSink {
    chain: ChainKind,
    ledger: Arc<Ledger>,
    fees: FeeTable,
}

impl EventSink {
    pub(crate) fn new(chain: ChainKind, ledger: Arc<Ledger>, fees: FeeTable) -> Self {
        Self { chain, ledger, fees }
    }

    pub(crate) fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Height to resume from: one past the watermark, never below `start`.
    pub(crate) fn next_height(&self, start: u64) -> Result<u64, LedgerError> {
        Ok(self
            .ledger
            .watermark(self.chain)?
            .map_or(start, |w| (w + 1).max(start)))
    }

    pub(crate) fn ingest(
        &self,
        event: &ChainEvent,
        progress: &mut PollProgress,
    ) -> Result<(), LedgerError> {
        match &event.kind {
            EventKind::Lock { asset, amount, .. } if self.chain != ChainKind::Nervos => {
                let Some(lock) = LockRecord::from_event(self.chain, event) else {
                    return Ok(());
                };
                let assessment = self.fees.assess(self.chain, asset, *amount);
                if self.ledger.create_lock_if_absent(&lock, &assessment)? {
                    progress.created += 1;
                    info!(
                        "Ingested lock {} on {}: {} of {} for {}",
                        lock.id, self.chain, lock.amount, lock.asset, lock.recipient
                    );
                }
            }
            EventKind::Burn {
                destination,
                asset,
                amount,
                ..
            } if self.chain == ChainKind::Nervos => {
                let Some(burn) = BurnRecord::from_event(event) else {
                    return Ok(());
                };
                let assessment = self.fees.assess(*destination, asset, *amount);
                if self.ledger.create_burn_if_absent(&burn, &assessment)? {
                    progress.created += 1;
                    info!(
                        "Ingested burn {} to {}: {} of {} for {}",
                        burn.tx_hash, burn.destination, burn.amount, burn.asset, burn.recipient
                    );
                }
            }
            EventKind::Settlement { reference } if self.chain != ChainKind::Nervos => {
                if self.ledger.confirm_settlement(
                    reference,
                    &event.tx_id,
                    event.block_timestamp,
                )? {
                    progress.settled += 1;
                    info!(
                        "Unlock of burn {} settled by {} on {}",
                        reference, event.tx_id, self.chain
                    );
                } else {
                    debug!(
                        "Marker for burn {} in {} matches no pending submission",
                        reference, event.tx_id
                    );
                }
            }
            other => {
                warn!(
                    "Ignoring unexpected event on {} in {}: {:?}",
                    self.chain, event.tx_id, other
                );
            }
        }
        Ok(())
    }
}

/// Highest height buried under `confirmations` blocks, if any.
pub(crate) fn confirmed_height(tip: u64, confirmations: u64) -> Option<u64> {
    tip.checked_sub(confirmations)
}

/// Picks the watcher implementation for a chain.
pub fn build_watcher(
    client: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    fees: FeeTable,
    confirmations: u64,
    start_height: u64,
    config: &WatcherConfig,
) -> Arc<dyn ChainWatcher> {
    match client.chain() {
        ChainKind::Ethereum => Arc::new(AccountWatcher::new(
            client,
            ledger,
            fees,
            confirmations,
            start_height,
            config.batch_size,
        )),
        ChainKind::Bitcoin | ChainKind::Nervos => Arc::new(UtxoWatcher::new(
            client,
            ledger,
            fees,
            confirmations,
            start_height,
        )),
    }
}

// ============================================================================
// POLLING LOOP
// ============================================================================

/// Polls `watcher` forever.
///
/// Transient failures are retried after `retry_delay_ms`; after
/// `max_retry_times` consecutive failures the loop falls back to the normal
/// polling interval. Only a fatal error ends the loop.
pub async fn run_watcher(
    watcher: Arc<dyn ChainWatcher>,
    config: WatcherConfig,
) -> Result<(), WatchError> {
    let chain = watcher.chain();
    info!("Starting {} watcher", chain);

    let mut consecutive_failures: u32 = 0;
    loop {
        let delay = match watcher.poll_once().await {
            Ok(progress) => {
                consecutive_failures = 0;
                if progress.created > 0 || progress.settled > 0 {
                    info!(
                        "{} watcher at height {:?}: {} new, {} settled",
                        chain, progress.scanned_to, progress.created, progress.settled
                    );
                }
                config.polling_interval_ms
            }
            Err(WatchError::Fatal(message)) => {
                error!("{} watcher stopped: {}", chain, message);
                return Err(WatchError::Fatal(message));
            }
            Err(WatchError::Transient(message)) => {
                consecutive_failures += 1;
                error!(
                    "Error polling {} (attempt {}/{}): {}",
                    chain, consecutive_failures, config.max_retry_times, message
                );
                if consecutive_failures >= config.max_retry_times {
                    consecutive_failures = 0;
                    config.polling_interval_ms
                } else {
                    config.retry_delay_ms
                }
            }
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
