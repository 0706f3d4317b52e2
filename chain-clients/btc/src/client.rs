//! bitcoind RPC client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use chain_clients_common::{
    ChainBlock, ChainClient, ChainError, ChainEvent, ChainKind, EventKind, ObservedTransaction,
    RpcTransport, SignedBatch, TxStatus,
};

use crate::script::{
    lock_recipient, op_return_payload, sats_to_btc, settlement_payload, settlement_references,
    value_to_sats,
};

/// Asset identifier of native bitcoin in bridge records.
pub const NATIVE_ASSET: &str = "btc";

/// bitcoind error codes that mean the transaction itself is unacceptable.
const RPC_VERIFY_ERROR: i64 = -25;
const RPC_VERIFY_REJECTED: i64 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;
const RPC_INVALID_PARAMETER: i64 = -8;

// ============================================================================
// RPC STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct BtcBlock {
    hash: String,
    height: u64,
    time: i64,
    tx: Vec<BtcTx>,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcTx {
    txid: String,
    #[serde(default)]
    vin: Vec<BtcVin>,
    vout: Vec<BtcVout>,
    #[serde(default)]
    blockhash: Option<String>,
    #[serde(default)]
    confirmations: Option<u64>,
    #[serde(default)]
    blocktime: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcVin {
    #[serde(default)]
    prevout: Option<BtcPrevout>,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcPrevout {
    #[serde(rename = "scriptPubKey")]
    script_pub_key: BtcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcVout {
    value: serde_json::Value,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pub_key: BtcScriptPubKey,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcScriptPubKey {
    hex: String,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct BtcBlockHeader {
    height: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct FundedTx {
    hex: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SignedTx {
    hex: String,
    complete: bool,
}

/// Payment a user makes to lock bitcoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtcLockPayment {
    pub to: String,
    pub amount: String,
    /// Hex of the OP_RETURN payload naming the home-ledger recipient.
    pub op_return: String,
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtcClientConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    /// Custody multisig address that receives locks and funds unlocks.
    pub multisig_address: String,
    #[serde(default = "default_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

pub struct BtcClient {
    transport: RpcTransport,
    multisig_address: String,
}

impl BtcClient {
    pub fn new(config: &BtcClientConfig) -> Result<Self, ChainError> {
        let transport =
            RpcTransport::new(&config.rpc_url, Duration::from_millis(config.rpc_timeout_ms))?
                .with_basic_auth(&config.rpc_user, &config.rpc_password);
        Ok(Self {
            transport,
            multisig_address: config.multisig_address.clone(),
        })
    }

    pub fn multisig_address(&self) -> &str {
        &self.multisig_address
    }

    pub fn build_lock_payment(&self, amount: u128, recipient: &str) -> BtcLockPayment {
        BtcLockPayment {
            to: self.multisig_address.clone(),
            amount: sats_to_btc(amount),
            op_return: hex::encode(recipient.as_bytes()),
        }
    }

    /// True when every input of `tx` spends a custody output. Needs the
    /// prevouts, which bitcoind includes at verbosity 3 for blocks and 2 for
    /// single transactions.
    fn spends_only_custody(&self, tx: &BtcTx) -> bool {
        !tx.vin.is_empty()
            && tx.vin.iter().all(|vin| {
                vin.prevout
                    .as_ref()
                    .and_then(|p| p.script_pub_key.address.as_deref())
                    == Some(self.multisig_address.as_str())
            })
    }

    /// Bridge events of one non-coinbase transaction.
    fn decode_tx(&self, tx: &BtcTx, height: u64, timestamp: i64) -> Vec<ChainEvent> {
        let payloads: Vec<(u32, Vec<u8>)> = tx
            .vout
            .iter()
            .filter_map(|v| op_return_payload(&v.script_pub_key.hex).map(|p| (v.n, p)))
            .collect();

        for (_, payload) in &payloads {
            if let Some(references) = settlement_references(payload) {
                if !self.spends_only_custody(tx) {
                    warn!("Ignoring settlement marker in {} not paid from custody", tx.txid);
                    return Vec::new();
                }
                return references
                    .into_iter()
                    .enumerate()
                    .map(|(i, reference)| ChainEvent {
                        tx_id: tx.txid.clone(),
                        index: i as u32,
                        block_height: height,
                        block_timestamp: timestamp,
                        kind: EventKind::Settlement { reference },
                    })
                    .collect();
            }
        }

        // vout[0] pays custody, vout[1] names the recipient.
        let (payment, memo) = match (tx.vout.first(), tx.vout.get(1)) {
            (Some(payment), Some(memo)) => (payment, memo),
            _ => return Vec::new(),
        };
        if payment.script_pub_key.address.as_deref() != Some(self.multisig_address.as_str()) {
            return Vec::new();
        }
        let recipient = match op_return_payload(&memo.script_pub_key.hex)
            .as_deref()
            .and_then(lock_recipient)
        {
            Some(recipient) => recipient,
            None => return Vec::new(),
        };
        let amount = match value_to_sats(&payment.value) {
            Ok(amount) => amount,
            Err(e) => {
                debug!("Skipping lock {} with unreadable amount: {}", tx.txid, e);
                return Vec::new();
            }
        };
        let sender = tx
            .vin
            .first()
            .and_then(|vin| vin.prevout.as_ref())
            .and_then(|p| p.script_pub_key.address.clone())
            .unwrap_or_default();

        vec![ChainEvent {
            tx_id: tx.txid.clone(),
            index: payment.n,
            block_height: height,
            block_timestamp: timestamp,
            kind: EventKind::Lock {
                asset: NATIVE_ASSET.to_string(),
                amount,
                sender,
                recipient,
                extra_data: String::new(),
            },
        }]
    }
}

#[async_trait]
impl ChainClient for BtcClient {
    fn chain(&self) -> ChainKind {
        ChainKind::Bitcoin
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.transport.call("getblockcount", json!([])).await
    }

    async fn block(&self, height: u64) -> Result<Option<ChainBlock>, ChainError> {
        let hash: String = match self.transport.call("getblockhash", json!([height])).await {
            Ok(hash) => hash,
            // "Block height out of range"
            Err(ChainError::Rpc { code, .. }) if code == RPC_INVALID_PARAMETER => return Ok(None),
            Err(e) => return Err(e),
        };
        // Verbosity 3 includes prevouts, which carry the sender address.
        let block: BtcBlock = match self.transport.call("getblock", json!([hash, 3])).await {
            Ok(block) => block,
            Err(ChainError::Rpc { message, .. }) if message.contains("pruned") => {
                return Err(ChainError::Pruned {
                    requested: height,
                    horizon: height + 1,
                })
            }
            Err(e) => return Err(e),
        };

        let system_only = block.tx.len() <= 1;
        let events = block
            .tx
            .iter()
            .skip(1)
            .flat_map(|tx| self.decode_tx(tx, block.height, block.time))
            .collect();

        Ok(Some(ChainBlock {
            height: block.height,
            hash: block.hash,
            timestamp: block.time,
            events,
            system_only,
        }))
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<ObservedTransaction>, ChainError> {
        let txid = tx_id.strip_prefix("0x").unwrap_or(tx_id);
        let tx: Option<BtcTx> = match self
            .transport
            .call_optional("getrawtransaction", json!([txid, 2]))
            .await
        {
            Ok(tx) => tx,
            // "No such mempool or blockchain transaction"
            Err(ChainError::Rpc { code: -5, .. }) => None,
            Err(e) => return Err(e),
        };
        let tx = match tx {
            Some(tx) => tx,
            None => return Ok(None),
        };

        let confirmations = tx.confirmations.unwrap_or(0);
        let block_height = match (&tx.blockhash, confirmations) {
            (Some(hash), c) if c > 0 => {
                let header: BtcBlockHeader =
                    self.transport.call("getblockheader", json!([hash])).await?;
                Some(header.height)
            }
            _ => None,
        };
        let timestamp = tx.blocktime.unwrap_or_default();
        let events = self.decode_tx(&tx, block_height.unwrap_or_default(), timestamp);

        Ok(Some(ObservedTransaction {
            tx_id: tx.txid.clone(),
            block_height,
            block_timestamp: tx.blocktime,
            confirmations,
            status: if block_height.is_some() {
                TxStatus::Committed
            } else {
                TxStatus::Pending
            },
            events,
        }))
    }

    async fn multisig_nonce(&self) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }

    /// Pays every record from the custody wallet in one transaction whose
    /// OP_RETURN names the settled burns.
    async fn submit_multisig(&self, batch: &SignedBatch) -> Result<String, ChainError> {
        let references: Vec<String> = batch.records.iter().map(|r| r.ref_id.clone()).collect();
        let payload = settlement_payload(&references)?;

        let mut outputs: Vec<serde_json::Value> = batch
            .records
            .iter()
            .map(|r| {
                let mut output = serde_json::Map::new();
                output.insert(r.recipient.clone(), json!(sats_to_btc(r.amount)));
                serde_json::Value::Object(output)
            })
            .collect();
        outputs.push(json!({ "data": hex::encode(payload) }));

        let raw: String = self
            .transport
            .call("createrawtransaction", json!([[], outputs]))
            .await
            .map_err(reject_verify_errors)?;
        let funded: FundedTx = self
            .transport
            .call(
                "fundrawtransaction",
                json!([raw, { "changeAddress": self.multisig_address }]),
            )
            .await
            .map_err(reject_verify_errors)?;
        let signed: SignedTx = self
            .transport
            .call("signrawtransactionwithwallet", json!([funded.hex]))
            .await?;
        if !signed.complete {
            return Err(ChainError::Rejected(
                "custody wallet could not fully sign the payout".to_string(),
            ));
        }
        let txid: String = self
            .transport
            .call("sendrawtransaction", json!([signed.hex]))
            .await
            .map_err(reject_verify_errors)?;

        info!(
            "Submitted BTC payout for {} burns, txid={}",
            references.len(),
            txid
        );
        Ok(txid)
    }
}

fn reject_verify_errors(err: ChainError) -> ChainError {
    match err {
        ChainError::Rpc { code, message }
            if matches!(
                code,
                RPC_VERIFY_ERROR
                    | RPC_VERIFY_REJECTED
                    | RPC_VERIFY_ALREADY_IN_CHAIN
                    | RPC_INVALID_PARAMETER
            ) =>
        {
            ChainError::Rejected(format!("{} (code {})", message, code))
        }
        other => other,
    }
}
