//! Locks paid to the Bitcoin custody address.

use async_trait::async_trait;
use std::sync::Arc;

use bridge_protocol::{FeeTable, SignError};
use chain_clients_common::{ChainClient, ChainKind, EventKind, TransferKind, TransferRecord};

use super::{apply_fee, event_at, fetch_confirmed, parse_lock_ref};
use super::{CanonicalTransfer, TransferVerifier};

const BTC_ASSET: &str = "btc";

/// Re-derives mints from custody payments carrying an OP_RETURN recipient.
pub struct BtcLockVerifier {
    client: Arc<dyn ChainClient>,
    confirmations: u64,
    fees: FeeTable,
}

impl BtcLockVerifier {
    pub fn new(client: Arc<dyn ChainClient>, confirmations: u64, fees: FeeTable) -> Self {
        Self {
            client,
            confirmations,
            fees,
        }
    }
}

#[async_trait]
impl TransferVerifier for BtcLockVerifier {
    fn source_chain(&self) -> ChainKind {
        ChainKind::Bitcoin
    }

    fn transfer_kind(&self) -> TransferKind {
        TransferKind::Mint
    }

    async fn derive_expected_transfer(&self, ref_id: &str) -> Result<CanonicalTransfer, SignError> {
        let (txid, vout) = parse_lock_ref(ref_id)?;
        if txid.len() != 64 || hex::decode(txid).is_err() {
            return Err(SignError::invalid_params(format!("{} is not a Bitcoin txid", txid)));
        }

        let tx = fetch_confirmed(&self.client, txid, self.confirmations).await?;
        let event = event_at(&tx, vout).ok_or_else(|| {
            SignError::invalid_record(format!("output {} of {} is not a custody payment", vout, txid))
        })?;
        let EventKind::Lock {
            asset,
            amount,
            recipient,
            ..
        } = &event.kind
        else {
            return Err(SignError::invalid_record(format!(
                "output {} of {} is not a bridge lock",
                vout, txid
            )));
        };
        if !asset.eq_ignore_ascii_case(BTC_ASSET) {
            return Err(SignError::invalid_record(format!(
                "lock {} names asset {}",
                ref_id, asset
            )));
        }
        if recipient.is_empty() {
            return Err(SignError::invalid_record(format!(
                "lock {} has no OP_RETURN recipient",
                ref_id
            )));
        }

        let (fee, net) = apply_fee(&self.fees, ChainKind::Bitcoin, asset, *amount, ref_id)?;
        Ok(CanonicalTransfer {
            kind: TransferKind::Mint,
            source_chain: ChainKind::Bitcoin,
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
