//! Per-chain transfer verifiers
//!
//! Each verifier answers one question: given a source reference, what record
//! would an honest collector put into a proposal? The answer is built only from
//! the source chain and this node's own fee table. Comparing it with what the
//! collector sent is left to [`bridge_protocol::verify_proposal`].

mod btc;
mod ckb;
mod evm;

pub use btc::BtcLockVerifier;
pub use ckb::CkbBurnVerifier;
pub use evm::EvmLockVerifier;

use async_trait::async_trait;
use std::sync::Arc;

use bridge_protocol::{Assessment, FeeTable, SigErrorCode, SignError};
use chain_clients_common::{
    ChainClient, ChainError, ChainEvent, ChainKind, ObservedTransaction, TransferKind,
    TransferRecord, TxStatus,
};

/// A transfer as re-derived from source-chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTransfer {
    pub kind: TransferKind,
    pub source_chain: ChainKind,
    /// Chain the resulting batch is submitted to.
    pub destination: ChainKind,
    /// The record exactly as it must appear in the proposal.
    pub record: TransferRecord,
    pub source_amount: u128,
    pub fee: u128,
}

/// Re-derivation capability for one source chain.
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    fn source_chain(&self) -> ChainKind;

    fn transfer_kind(&self) -> TransferKind;

    async fn derive_expected_transfer(&self, ref_id: &str) -> Result<CanonicalTransfer, SignError>;
}

pub(crate) fn chain_error(chain: ChainKind, err: ChainError) -> SignError {
    match err {
        ChainError::NotFound(what) => {
            SignError::new(SigErrorCode::TxNotFound, format!("{} on {}", what, chain))
        }
        ChainError::Pruned { .. } => SignError::new(
            SigErrorCode::BlockSyncUncompleted,
            format!("{} node cannot serve the transaction: {}", chain, err),
        ),
        ChainError::Decode(message) => SignError::invalid_record(format!(
            "undecodable source transaction on {}: {}",
            chain, message
        )),
        other => SignError::new(
            SigErrorCode::Unknown,
            format!("{} unavailable: {}", chain, other),
        ),
    }
}

/// Fetches `tx_id` and requires it to be buried under `depth` blocks.
///
/// `depth` counts blocks after the including one, the same way the
/// collector's watchers do.
pub(crate) async fn fetch_confirmed(
    client: &Arc<dyn ChainClient>,
    tx_id: &str,
    depth: u64,
) -> Result<ObservedTransaction, SignError> {
    let chain = client.chain();
    let tx = client
        .transaction(tx_id)
        .await
        .map_err(|e| chain_error(chain, e))?
        .ok_or_else(|| {
            SignError::new(
                SigErrorCode::TxNotFound,
                format!("transaction {} not found on {}", tx_id, chain),
            )
        })?;

    match tx.status {
        TxStatus::Failed => Err(SignError::invalid_record(format!(
            "transaction {} failed on {}",
            tx_id, chain
        ))),
        _ if !tx.is_confirmed(depth.saturating_add(1)) => Err(SignError::new(
            SigErrorCode::TxUnconfirmed,
            format!(
                "transaction {} has {} confirmations on {}, {} required",
                tx_id,
                tx.confirmations.saturating_sub(1),
                chain,
                depth
            ),
        )),
        _ => Ok(tx),
    }
}

/// Splits a lock reference `txid#index`.
pub(crate) fn parse_lock_ref(ref_id: &str) -> Result<(&str, u32), SignError> {
    let (tx_id, index) = ref_id
        .rsplit_once('#')
        .ok_or_else(|| SignError::invalid_params(format!("lock reference {} has no index", ref_id)))?;
    let index = index
        .parse::<u32>()
        .map_err(|_| SignError::invalid_params(format!("lock reference {} has a bad index", ref_id)))?;
    if tx_id.is_empty() {
        return Err(SignError::invalid_params(format!("lock reference {} has no tx id", ref_id)));
    }
    Ok((tx_id, index))
}

pub(crate) fn event_at(tx: &ObservedTransaction, index: u32) -> Option<&ChainEvent> {
    tx.events.iter().find(|e| e.index == index)
}

/// Applies the fee table; a transfer the table rejects is never signed.
pub(crate) fn apply_fee(
    fees: &FeeTable,
    chain: ChainKind,
    asset: &str,
    amount: u128,
    ref_id: &str,
) -> Result<(u128, u128), SignError> {
    match fees.assess(chain, asset, amount) {
        Assessment::Accepted { fee, net } => Ok((fee, net)),
        Assessment::Rejected { reason } => Err(SignError::invalid_record(format!(
            "{} is not bridged: {}",
            ref_id, reason
        ))),
    }
}

pub(crate) fn is_hex_of_len(value: &str, bytes: usize) -> bool {
    value
        .strip_prefix("0x")
        .map_or(false, |digits| digits.len() == bytes * 2 && hex::decode(digits).is_ok())
}
