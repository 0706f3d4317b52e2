//! Locks on the Ethereum bridge contract.

use async_trait::async_trait;
use std::sync::Arc;

use bridge_protocol::{FeeTable, SignError};
use chain_clients_common::{ChainClient, ChainKind, EventKind, TransferKind, TransferRecord};

use super::{apply_fee, event_at, fetch_confirmed, is_hex_of_len, parse_lock_ref};
use super::{CanonicalTransfer, TransferVerifier};

/// Re-derives mints from `Locked` logs.
pub struct EvmLockVerifier {
    client: Arc<dyn ChainClient>,
    confirmations: u64,
    fees: FeeTable,
}

impl EvmLockVerifier {
    pub fn new(client: Arc<dyn ChainClient>, confirmations: u64, fees: FeeTable) -> Self {
        Self {
            client,
            confirmations,
            fees,
        }
    }
}

#[async_trait]
impl TransferVerifier for EvmLockVerifier {
    fn source_chain(&self) -> ChainKind {
        ChainKind::Ethereum
    }

    fn transfer_kind(&self) -> TransferKind {
        TransferKind::Mint
    }

    async fn derive_expected_transfer(&self, ref_id: &str) -> Result<CanonicalTransfer, SignError> {
        let (tx_hash, log_index) = parse_lock_ref(ref_id)?;
        if !is_hex_of_len(tx_hash, 32) {
            return Err(SignError::invalid_params(format!(
                "{} is not an Ethereum transaction hash",
                tx_hash
            )));
        }

        let tx = fetch_confirmed(&self.client, tx_hash, self.confirmations).await?;
        let event = event_at(&tx, log_index).ok_or_else(|| {
            SignError::invalid_record(format!("{} has no log {}", tx_hash, log_index))
        })?;
        let EventKind::Lock {
            asset,
            amount,
            recipient,
            ..
        } = &event.kind
        else {
            return Err(SignError::invalid_record(format!(
                "log {} of {} is not a bridge lock",
                log_index, tx_hash
            )));
        };
        if !is_hex_of_len(asset, 20) {
            return Err(SignError::invalid_record(format!(
                "lock {} carries asset {} which is not a token address",
                ref_id, asset
            )));
        }
        if recipient.is_empty() {
            return Err(SignError::invalid_record(format!("lock {} has no recipient", ref_id)));
        }

        let (fee, net) = apply_fee(&self.fees, ChainKind::Ethereum, asset, *amount, ref_id)?;
        Ok(CanonicalTransfer {
            kind: TransferKind::Mint,
            source_chain: ChainKind::Ethereum,
            destination: ChainKind::Nervos,
            record: TransferRecord {
                asset: asset.clone(),
                recipient: recipient.clone(),
                amount: net,
                ref_id: event.lock_id(),
            },
            source_amount: *amount,
            fee,
        })
    }
}
