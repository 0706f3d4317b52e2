//! In-memory chain for tests.
//!
//! Blocks are mined explicitly by the test. Submitted batches are included in
//! a freshly mined block right away, and unlock batches leave one settlement
//! marker per record, the same way the real destination chains do.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::client::{ChainClient, ChainError};
use crate::types::{
    ChainBlock, ChainEvent, ChainKind, EventKind, ObservedTransaction, SignedBatch, TransferKind,
    TxStatus,
};

const GENESIS_TIMESTAMP: i64 = 1_600_000_000;

struct Inner {
    blocks: Vec<ChainBlock>,
    prune_horizon: u64,
    nonce: Option<u64>,
    submitted: Vec<(String, SignedBatch)>,
    /// Inclusion height of every submitted tx id.
    inclusions: HashMap<String, u64>,
    tx_counter: u64,
    transient_failures: u32,
    rejections: u32,
}

pub struct MemoryChain {
    chain: ChainKind,
    inner: Mutex<Inner>,
}

impl MemoryChain {
    /// Creates a chain holding only a system-only genesis block.
    pub fn new(chain: ChainKind) -> Self {
        let genesis = ChainBlock {
            height: 0,
            hash: block_hash(0),
            timestamp: GENESIS_TIMESTAMP,
            events: Vec::new(),
            system_only: true,
        };
        Self {
            chain,
            inner: Mutex::new(Inner {
                blocks: vec![genesis],
                prune_horizon: 0,
                nonce: None,
                submitted: Vec::new(),
                inclusions: HashMap::new(),
                tx_counter: 0,
                transient_failures: 0,
                rejections: 0,
            }),
        }
    }

    /// Gives the bridge multisig an on-chain replay nonce starting at `start`.
    pub fn with_nonce(self, start: u64) -> Self {
        self.inner.lock().nonce = Some(start);
        self
    }

    /// Mines a block containing `events` (tx id, index, payload) and returns
    /// its height.
    pub fn mine(&self, events: Vec<(String, u32, EventKind)>) -> u64 {
        let mut inner = self.inner.lock();
        let height = inner.blocks.len() as u64;
        let timestamp = GENESIS_TIMESTAMP + height as i64 * 10;
        let system_only = events.is_empty();
        let events = events
            .into_iter()
            .map(|(tx_id, index, kind)| ChainEvent {
                tx_id,
                index,
                block_height: height,
                block_timestamp: timestamp,
                kind,
            })
            .collect();
        inner.blocks.push(ChainBlock {
            height,
            hash: block_hash(height),
            timestamp,
            events,
            system_only,
        });
        height
    }

    /// Mines `count` blocks with no bridge activity.
    pub fn mine_empty(&self, count: u64) {
        for _ in 0..count {
            self.mine(Vec::new());
        }
    }

    pub fn set_prune_horizon(&self, horizon: u64) {
        self.inner.lock().prune_horizon = horizon;
    }

    /// The next `count` read calls fail with a transport error.
    pub fn fail_next_reads(&self, count: u32) {
        self.inner.lock().transient_failures = count;
    }

    /// The next `count` submissions are rejected by the chain.
    pub fn reject_next_submissions(&self, count: u32) {
        self.inner.lock().rejections = count;
    }

    pub fn current_nonce(&self) -> Option<u64> {
        self.inner.lock().nonce
    }

    pub fn submitted(&self) -> Vec<SignedBatch> {
        self.inner
            .lock()
            .submitted
            .iter()
            .map(|(_, batch)| batch.clone())
            .collect()
    }

    pub fn submitted_tx_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .submitted
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn take_transient_failure(&self) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(ChainError::Transport {
                endpoint: format!("memory://{}", self.chain),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

fn block_hash(height: u64) -> String {
    format!("0x{:064x}", height + 0xb10c)
}

#[async_trait]
impl ChainClient for MemoryChain {
    fn chain(&self) -> ChainKind {
        self.chain
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.take_transient_failure()?;
        Ok(self.inner.lock().blocks.len() as u64 - 1)
    }

    async fn block(&self, height: u64) -> Result<Option<ChainBlock>, ChainError> {
        self.take_transient_failure()?;
        let inner = self.inner.lock();
        if height < inner.prune_horizon {
            return Err(ChainError::Pruned {
                requested: height,
                horizon: inner.prune_horizon,
            });
        }
        Ok(inner.blocks.get(height as usize).cloned())
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<ObservedTransaction>, ChainError> {
        self.take_transient_failure()?;
        let inner = self.inner.lock();
        let tip = inner.blocks.len() as u64 - 1;

        let height = match inner.inclusions.get(tx_id) {
            Some(height) => Some(*height),
            None => inner
                .blocks
                .iter()
                .find(|b| b.events.iter().any(|e| e.tx_id == tx_id))
                .map(|b| b.height),
        };

        Ok(height.and_then(|height| {
            inner.blocks.get(height as usize).map(|block| ObservedTransaction {
                tx_id: tx_id.to_string(),
                block_height: Some(height),
                block_timestamp: Some(block.timestamp),
                confirmations: tip - height + 1,
                status: TxStatus::Committed,
                events: block
                    .events
                    .iter()
                    .filter(|e| e.tx_id == tx_id)
                    .cloned()
                    .collect(),
            })
        }))
    }

    async fn multisig_nonce(&self) -> Result<Option<u64>, ChainError> {
        Ok(self.inner.lock().nonce)
    }

    async fn submit_multisig(&self, batch: &SignedBatch) -> Result<String, ChainError> {
        let (tx_id, markers) = {
            let mut inner = self.inner.lock();
            if inner.rejections > 0 {
                inner.rejections -= 1;
                return Err(ChainError::Rejected("injected rejection".to_string()));
            }
            if let Some(current) = inner.nonce {
                if batch.nonce != current {
                    return Err(ChainError::Rejected(format!(
                        "nonce {} does not match multisig nonce {}",
                        batch.nonce, current
                    )));
                }
                inner.nonce = Some(current + 1);
            }
            inner.tx_counter += 1;
            let tx_id = format!("0x{:064x}", 0x5ee0_0000u64 + inner.tx_counter);
            inner.submitted.push((tx_id.clone(), batch.clone()));

            let markers: Vec<(String, u32, EventKind)> = match batch.kind {
                TransferKind::Unlock => batch
                    .records
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        (
                            tx_id.clone(),
                            i as u32,
                            EventKind::Settlement {
                                reference: r.ref_id.clone(),
                            },
                        )
                    })
                    .collect(),
                TransferKind::Mint => Vec::new(),
            };
            (tx_id, markers)
        };

        let height = self.mine(markers);
        let mut inner = self.inner.lock();
        inner.inclusions.insert(tx_id.clone(), height);
        if let Some(block) = inner.blocks.get_mut(height as usize) {
            block.system_only = false;
        }
        Ok(tx_id)
    }
}

