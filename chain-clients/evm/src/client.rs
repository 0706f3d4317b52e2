//! EVM Client Module
//!
//! JSON-RPC client for EVM-compatible nodes, scoped to the bridge contract.
//! Lock and settlement events are read with `eth_getLogs`; unlocks are sent
//! from the relayer account with `eth_sendTransaction`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use chain_clients_common::hex_utils::{decode_hex, encode_quantity, normalize_hex, parse_quantity};
use chain_clients_common::{
    ChainBlock, ChainClient, ChainError, ChainEvent, ChainKind, EventKind, ObservedTransaction,
    RpcTransport, SignedBatch, TxStatus,
};

use crate::abi::{
    self, decode_bytes, decode_u64, decode_uint, encode_call, event_topic, parse_address,
    topic_address, Token,
};

/// Native ether is locked under the zero address.
pub const NATIVE_ASSET: &str = "0x0000000000000000000000000000000000000000";

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

#[derive(Debug, Clone, Deserialize)]
struct EvmBlockHeader {
    number: String,
    hash: String,
    timestamp: String,
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct EvmReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<EvmLog>,
}

/// Unsigned call a user signs to lock funds in the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvmTx {
    pub to: String,
    pub data: String,
    pub value: String,
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmClientConfig {
    pub rpc_url: String,
    pub bridge_contract: String,
    /// Node-managed account that pays gas for unlock transactions.
    pub relayer_address: String,
    /// Gas price used while automatic pricing is switched off.
    #[serde(default = "default_gas_price_gwei")]
    pub gas_price_gwei: u64,
    #[serde(default = "default_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_gas_price_gwei() -> u64 {
    20
}

fn default_timeout_ms() -> u64 {
    30_000
}

pub struct EvmClient {
    transport: RpcTransport,
    bridge_contract: String,
    relayer_address: String,
    gas_price_gwei: u64,
    /// When set the node picks the gas price; toggled at runtime by the
    /// collector API.
    gas_price_auto: Arc<AtomicBool>,
}

impl EvmClient {
    /// Creates a new EVM client for the given configuration.
    ///
    /// # Arguments
    ///
    /// * `config` - Node URL, bridge contract and relayer account
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(ChainError)` - Failed to build the HTTP client
    pub fn new(config: &EvmClientConfig) -> Result<Self, ChainError> {
        let transport =
            RpcTransport::new(&config.rpc_url, Duration::from_millis(config.rpc_timeout_ms))?;
        Ok(Self {
            transport,
            bridge_contract: normalize_hex(&config.bridge_contract),
            relayer_address: normalize_hex(&config.relayer_address),
            gas_price_gwei: config.gas_price_gwei,
            gas_price_auto: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Shared switch for automatic gas pricing.
    pub fn gas_price_switch(&self) -> Arc<AtomicBool> {
        self.gas_price_auto.clone()
    }

    pub fn bridge_contract(&self) -> &str {
        &self.bridge_contract
    }

    /// Builds the unsigned call that locks `amount` of `asset` for a
    /// home-ledger `recipient`.
    pub fn build_lock_transaction(
        &self,
        asset: &str,
        amount: u128,
        recipient_lockscript: &str,
        extra_data: &str,
    ) -> Result<UnsignedEvmTx, ChainError> {
        let recipient = decode_hex(recipient_lockscript)?;
        let extra = if extra_data.is_empty() {
            Vec::new()
        } else {
            decode_hex(extra_data)?
        };

        let (data, value) = if normalize_hex(asset) == NATIVE_ASSET {
            (
                encode_call(
                    abi::LOCK_ETH_FN,
                    &[Token::Bytes(recipient), Token::Bytes(extra)],
                ),
                amount,
            )
        } else {
            (
                encode_call(
                    abi::LOCK_TOKEN_FN,
                    &[
                        Token::Address(parse_address(asset)?),
                        Token::Uint(amount),
                        Token::Bytes(recipient),
                        Token::Bytes(extra),
                    ],
                ),
                0,
            )
        };

        Ok(UnsignedEvmTx {
            to: self.bridge_contract.clone(),
            data: format!("0x{}", hex::encode(data)),
            value: format!("0x{:x}", value),
        })
    }

    async fn header(&self, height: u64) -> Result<Option<EvmBlockHeader>, ChainError> {
        self.transport
            .call_optional("eth_getBlockByNumber", json!([encode_quantity(height), false]))
            .await
    }

    async fn block_timestamps(&self, heights: &[u64]) -> Result<HashMap<u64, i64>, ChainError> {
        let mut timestamps = HashMap::new();
        for height in heights {
            if timestamps.contains_key(height) {
                continue;
            }
            let header = self
                .header(*height)
                .await?
                .ok_or_else(|| ChainError::NotFound(format!("block {}", height)))?;
            timestamps.insert(*height, parse_quantity(&header.timestamp)? as i64);
        }
        Ok(timestamps)
    }

    /// Decodes bridge logs; logs from other contracts or with unknown
    /// topics are skipped.
    fn decode_logs(
        &self,
        logs: &[EvmLog],
        timestamps: &HashMap<u64, i64>,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        let locked = event_topic(abi::LOCKED_EVENT);
        let unlocked = event_topic(abi::UNLOCKED_EVENT);
        let mut events = Vec::new();

        for log in logs {
            if normalize_hex(&log.address) != self.bridge_contract || log.topics.is_empty() {
                continue;
            }
            let topic0 = normalize_hex(&log.topics[0]);
            let block_height = parse_quantity(&log.block_number)?;
            let index = u32::try_from(parse_quantity(&log.log_index)?)
                .map_err(|_| ChainError::Decode(format!("log index {} out of range", log.log_index)))?;
            let data = decode_hex(&log.data)?;

            let kind = if topic0 == locked {
                // Locked(address indexed token, address indexed sender,
                //        uint256 lockedAmount, bytes recipientLockscript, bytes sudtExtraData)
                if log.topics.len() < 3 {
                    continue;
                }
                EventKind::Lock {
                    asset: topic_address(&log.topics[1])?,
                    sender: topic_address(&log.topics[2])?,
                    amount: decode_uint(&data, 0)?,
                    recipient: format!("0x{}", hex::encode(decode_bytes(&data, 1)?)),
                    extra_data: format!("0x{}", hex::encode(decode_bytes(&data, 2)?)),
                }
            } else if topic0 == unlocked {
                // Unlocked(address indexed token, address indexed recipient, address indexed sender,
                //          uint256 receivedAmount, bytes ckbTxHash)
                EventKind::Settlement {
                    reference: format!("0x{}", hex::encode(decode_bytes(&data, 1)?)),
                }
            } else {
                continue;
            };

            events.push(ChainEvent {
                tx_id: normalize_hex(&log.transaction_hash),
                index,
                block_height,
                block_timestamp: timestamps.get(&block_height).copied().unwrap_or_default(),
                kind,
            });
        }

        events.sort_by_key(|e| (e.block_height, e.index));
        Ok(events)
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn chain(&self) -> ChainKind {
        ChainKind::Ethereum
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        let height: String = self.transport.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&height)
    }

    async fn block(&self, height: u64) -> Result<Option<ChainBlock>, ChainError> {
        let header = match self.header(height).await? {
            Some(header) => header,
            None => {
                let tip = self.tip_height().await?;
                if height <= tip {
                    return Err(ChainError::Pruned {
                        requested: height,
                        horizon: height + 1,
                    });
                }
                return Ok(None);
            }
        };
        let events = self.events_in_range(height, height).await?;
        Ok(Some(ChainBlock {
            height: parse_quantity(&header.number)?,
            hash: normalize_hex(&header.hash),
            timestamp: parse_quantity(&header.timestamp)? as i64,
            system_only: header.transactions.is_empty(),
            events,
        }))
    }

    async fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<ChainEvent>, ChainError> {
        let filter = json!({
            "address": self.bridge_contract,
            "topics": [[event_topic(abi::LOCKED_EVENT), event_topic(abi::UNLOCKED_EVENT)]],
            "fromBlock": encode_quantity(from),
            "toBlock": encode_quantity(to),
        });
        let logs: Vec<EvmLog> = self
            .transport
            .call_optional("eth_getLogs", json!([filter]))
            .await?
            .unwrap_or_default();
        debug!("eth_getLogs [{}, {}] returned {} logs", from, to, logs.len());

        let mut heights = Vec::new();
        for log in &logs {
            heights.push(parse_quantity(&log.block_number)?);
        }
        let timestamps = self.block_timestamps(&heights).await?;
        self.decode_logs(&logs, &timestamps)
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<ObservedTransaction>, ChainError> {
        let hash = normalize_hex(tx_id);
        let receipt: Option<EvmReceipt> = self
            .transport
            .call_optional("eth_getTransactionReceipt", json!([hash]))
            .await?;
        let receipt = match receipt {
            Some(receipt) => receipt,
            None => return Ok(None),
        };

        let block_height = match &receipt.block_number {
            Some(number) => Some(parse_quantity(number)?),
            None => None,
        };
        let (confirmations, timestamps) = match block_height {
            Some(height) => {
                let tip = self.tip_height().await?;
                (
                    tip.saturating_sub(height) + 1,
                    self.block_timestamps(&[height]).await?,
                )
            }
            None => (0, HashMap::new()),
        };
        let status = match (block_height, receipt.status.as_deref()) {
            (None, _) => TxStatus::Pending,
            (Some(_), Some("0x0")) => TxStatus::Failed,
            _ => TxStatus::Committed,
        };

        Ok(Some(ObservedTransaction {
            tx_id: hash,
            block_height,
            block_timestamp: block_height.and_then(|h| timestamps.get(&h).copied()),
            confirmations,
            status,
            events: self.decode_logs(&receipt.logs, &timestamps)?,
        }))
    }

    async fn multisig_nonce(&self) -> Result<Option<u64>, ChainError> {
        let call = json!({
            "to": self.bridge_contract,
            "data": format!("0x{}", hex::encode(abi::selector(abi::UNLOCK_NONCE_FN))),
        });
        let result: String = self.transport.call("eth_call", json!([call, "latest"])).await?;
        let data = decode_hex(&result)?;
        Ok(Some(decode_u64(&data, 0)?))
    }

    async fn submit_multisig(&self, batch: &SignedBatch) -> Result<String, ChainError> {
        let mut records = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            records.push(Token::Tuple(vec![
                Token::Address(parse_address(&record.asset)?),
                Token::Address(parse_address(&record.recipient)?),
                Token::Uint(record.amount),
                Token::Bytes(decode_hex(&record.ref_id)?),
            ]));
        }
        let signatures: Vec<u8> = batch.signatures.concat();
        let data = encode_call(
            abi::UNLOCK_FN,
            &[
                Token::Array(records),
                Token::Uint(batch.nonce as u128),
                Token::Bytes(signatures),
            ],
        );

        let mut tx = json!({
            "from": self.relayer_address,
            "to": self.bridge_contract,
            "data": format!("0x{}", hex::encode(data)),
        });
        if !self.gas_price_auto.load(Ordering::Relaxed) {
            tx["gasPrice"] = json!(encode_quantity(self.gas_price_gwei * 1_000_000_000));
        }

        match self.transport.call::<String>("eth_sendTransaction", json!([tx])).await {
            Ok(hash) => {
                info!(
                    "Submitted unlock batch nonce={} records={} tx={}",
                    batch.nonce,
                    batch.records.len(),
                    hash
                );
                Ok(normalize_hex(&hash))
            }
            // Reverts (stale nonce, bad signatures) will never succeed as-is.
            Err(ChainError::Rpc { code, message })
                if message.contains("revert") || message.contains("nonce") =>
            {
                Err(ChainError::Rejected(format!("{} (code {})", message, code)))
            }
            Err(e) => Err(e),
        }
    }
}
