//! Block-by-block watcher for UTXO and cell-model chains.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use bridge_protocol::FeeTable;
use chain_clients_common::{ChainClient, ChainKind};

use super::{confirmed_height, ChainWatcher, EventSink, PollProgress, WatchError};
use crate::ledger::Ledger;

pub struct UtxoWatcher {
    client: Arc<dyn ChainClient>,
    sink: EventSink,
    confirmations: u64,
    start_height: u64,
}

impl UtxoWatcher {
    pub fn new(
        client: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        fees: FeeTable,
        confirmations: u64,
        start_height: u64,
    ) -> Self {
        let sink = EventSink::new(client.chain(), ledger, fees);
        Self {
            client,
            sink,
            confirmations,
            start_height,
        }
    }
}

#[async_trait]
impl ChainWatcher for UtxoWatcher {
    fn chain(&self) -> ChainKind {
        self.client.chain()
    }

    async fn poll_once(&self) -> Result<PollProgress, WatchError> {
        let mut progress = PollProgress::default();
        let tip = self.client.tip_height().await?;
        let Some(confirmed) = confirmed_height(tip, self.confirmations) else {
            return Ok(progress);
        };

        let from = self.sink.next_height(self.start_height)?;
        for height in from..=confirmed {
            let Some(block) = self.client.block(height).await? else {
                return Err(WatchError::Transient(format!(
                    "block {} missing below confirmed height {}",
                    height, confirmed
                )));
            };
            if block.system_only {
                debug!("{} block {} has no user transactions", self.chain(), height);
            } else {
                for event in &block.events {
                    self.sink.ingest(event, &mut progress)?;
                }
            }
            self.sink.ledger().set_watermark(self.chain(), height)?;
            progress.scanned_to = Some(height);
        }
        Ok(progress)
    }
}
