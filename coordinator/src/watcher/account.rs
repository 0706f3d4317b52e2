//! Range-query watcher for account-model chains.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use bridge_protocol::FeeTable;
use chain_clients_common::{ChainClient, ChainKind};

use super::{confirmed_height, ChainWatcher, EventSink, PollProgress, WatchError};
use crate::ledger::Ledger;

pub struct AccountWatcher {
    client: Arc<dyn ChainClient>,
    sink: EventSink,
    confirmations: u64,
    start_height: u64,
    /// Largest block span of one log query.
    batch_size: u64,
}

impl AccountWatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        fees: FeeTable,
        confirmations: u64,
        start_height: u64,
        batch_size: u64,
    ) -> Self {
        let sink = EventSink::new(client.chain(), ledger, fees);
        Self {
            client,
            sink,
            confirmations,
            start_height,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl ChainWatcher for AccountWatcher {
    fn chain(&self) -> ChainKind {
        self.client.chain()
    }

    async fn poll_once(&self) -> Result<PollProgress, WatchError> {
        let mut progress = PollProgress::default();
        let tip = self.client.tip_height().await?;
        let Some(confirmed) = confirmed_height(tip, self.confirmations) else {
            return Ok(progress);
        };

        let mut from = self.sink.next_height(self.start_height)?;
        while from <= confirmed {
            let to = confirmed.min(from + self.batch_size - 1);
            let events = self.client.events_in_range(from, to).await?;
            debug!(
                "{} blocks {}..={}: {} bridge events",
                self.chain(),
                from,
                to,
                events.len()
            );
            for event in &events {
                self.sink.ingest(event, &mut progress)?;
            }
            self.sink.ledger().set_watermark(self.chain(), to)?;
            progress.scanned_to = Some(to);
            from = to + 1;
        }
        Ok(progress)
    }
}
