//! Burns on the home ledger.

use async_trait::async_trait;
use std::sync::Arc;

use bridge_protocol::{FeeTable, SignError};
use chain_clients_common::hex_utils::normalize_hex;
use chain_clients_common::{ChainClient, ChainKind, EventKind, TransferKind, TransferRecord};

use super::{apply_fee, fetch_confirmed, is_hex_of_len};
use super::{CanonicalTransfer, TransferVerifier};

/// Re-derives unlocks from burn transactions on the home ledger.
///
/// The client only reports a burn whose first input spends the bridged sUDT
/// of the named asset and whose consumed sUDT equals the claimed amount, so
/// the asset and amount read here are what was actually destroyed.
pub struct CkbBurnVerifier {
    client: Arc<dyn ChainClient>,
    confirmations: u64,
    fees: FeeTable,
}

impl CkbBurnVerifier {
    pub fn new(client: Arc<dyn ChainClient>, confirmations: u64, fees: FeeTable) -> Self {
        Self {
            client,
            confirmations,
            fees,
        }
    }
}

#[async_trait]
impl TransferVerifier for CkbBurnVerifier {
    fn source_chain(&self) -> ChainKind {
        ChainKind::Nervos
    }

    fn transfer_kind(&self) -> TransferKind {
        TransferKind::Unlock
    }

    async fn derive_expected_transfer(&self, ref_id: &str) -> Result<CanonicalTransfer, SignError> {
        let burn_hash = normalize_hex(ref_id);
        if !is_hex_of_len(&burn_hash, 32) {
            return Err(SignError::invalid_params(format!(
                "{} is not a home-ledger transaction hash",
                ref_id
            )));
        }

        let tx = fetch_confirmed(&self.client, &burn_hash, self.confirmations).await?;
        let (destination, asset, amount, recipient) = tx
            .events
            .iter()
            .find_map(|event| match &event.kind {
                EventKind::Burn {
                    destination,
                    asset,
                    amount,
                    recipient,
                    ..
                } => Some((*destination, asset, *amount, recipient)),
                _ => None,
            })
            .ok_or_else(|| {
                SignError::invalid_record(format!("{} is not a bridge burn", burn_hash))
            })?;

        let recipient_ok = match destination {
            ChainKind::Ethereum => is_hex_of_len(recipient, 20),
            ChainKind::Bitcoin => !recipient.is_empty(),
            ChainKind::Nervos => false,
        };
        if !recipient_ok {
            return Err(SignError::invalid_record(format!(
                "burn {} names recipient {:?} which is not a {} address",
                burn_hash, recipient, destination
            )));
        }

        let (fee, net) = apply_fee(&self.fees, destination, asset, amount, &burn_hash)?;
        Ok(CanonicalTransfer {
            kind: TransferKind::Unlock,
            source_chain: ChainKind::Nervos,
            destination,
            record: TransferRecord {
                asset: asset.clone(),
                recipient: recipient.clone(),
                amount: net,
                ref_id: burn_hash,
            },
            source_amount: amount,
            fee,
        })
    }
}
