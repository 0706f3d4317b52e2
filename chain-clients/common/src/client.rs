//! The `ChainClient` capability every chain integration provides.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ChainBlock, ChainEvent, ChainKind, ObservedTransaction, SignedBatch};

/// Errors surfaced by chain clients.
///
/// Only [`ChainError::Transport`] and [`ChainError::Rpc`] are transient; the
/// watcher and collector retry those and treat everything else as final for
/// the operation at hand.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("height {requested} is below the prune horizon {horizon}")]
    Pruned { requested: u64, horizon: u64 },

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("failed to decode chain data: {0}")]
    Decode(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transport { .. } | ChainError::Rpc { .. })
    }
}

/// Narrow interface to one chain.
///
/// Implementations decode chain-native data into [`ChainEvent`]s and encode a
/// [`SignedBatch`] into whatever transaction the chain's bridge contract or
/// script expects.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain(&self) -> ChainKind;

    async fn tip_height(&self) -> Result<u64, ChainError>;

    /// Returns `Ok(None)` for heights above the tip and
    /// [`ChainError::Pruned`] for heights the node no longer serves.
    async fn block(&self, height: u64) -> Result<Option<ChainBlock>, ChainError>;

    /// Bridge events in `[from, to]`, ordered by height then index.
    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>, ChainError> {
        let mut events = Vec::new();
        for height in from..=to {
            if let Some(block) = self.block(height).await? {
                events.extend(block.events);
            }
        }
        Ok(events)
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<ObservedTransaction>, ChainError>;

    /// Replay-protection nonce of the bridge multisig, if the chain keeps one.
    async fn multisig_nonce(&self) -> Result<Option<u64>, ChainError>;

    /// Submits an authorized batch and returns the destination tx id.
    async fn submit_multisig(&self, batch: &SignedBatch) -> Result<String, ChainError>;
}
