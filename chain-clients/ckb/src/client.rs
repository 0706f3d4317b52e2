//! CKB node and indexer client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use bridge_protocol::ckb_shape::{sudt_owner_args, CkbScriptConfig, MintTransaction, ScriptShape};
use bridge_protocol::payload::identity_bytes;
use chain_clients_common::hex_utils::{decode_hex, encode_quantity, normalize_hex, parse_quantity};
use chain_clients_common::{
    ChainBlock, ChainClient, ChainError, ChainEvent, ChainKind, EventKind, ObservedTransaction,
    RpcTransport, SignedBatch, TransferKind, TxStatus,
};

use crate::molecule::{witness_args_with_lock, RecipientCellData};

/// Cells fetched per indexer page when collecting a sender's sUDT balance.
const INDEXER_PAGE: u64 = 100;

// ============================================================================
// RPC STRUCTURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutPoint {
    pub tx_hash: String,
    pub index: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CkbHeader {
    number: String,
    hash: String,
    /// Milliseconds since the epoch, hex.
    timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CkbBlock {
    header: CkbHeader,
    transactions: Vec<CkbTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
struct CkbInput {
    previous_output: OutPoint,
}

#[derive(Debug, Clone, Deserialize)]
struct CkbOutput {
    capacity: String,
    lock: ScriptShape,
    #[serde(rename = "type", default)]
    type_script: Option<ScriptShape>,
}

#[derive(Debug, Clone, Deserialize)]
struct CkbTransaction {
    hash: String,
    #[serde(default)]
    inputs: Vec<CkbInput>,
    outputs: Vec<CkbOutput>,
    outputs_data: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxStatusView {
    status: String,
    #[serde(default)]
    block_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TransactionView {
    transaction: CkbTransaction,
    tx_status: TxStatusView,
}

#[derive(Debug, Clone, Deserialize)]
struct IndexerCell {
    output: CkbOutput,
    output_data: String,
    out_point: OutPoint,
}

#[derive(Debug, Clone, Deserialize)]
struct IndexerPage {
    objects: Vec<IndexerCell>,
    last_cursor: String,
}

// ============================================================================
// CLIENT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CkbClientConfig {
    pub rpc_url: String,
    /// Indexer endpoint; nodes with the built-in indexer serve it on `rpc_url`.
    #[serde(default)]
    pub indexer_url: Option<String>,
    /// Code hash of the lock that marks a cell as a bridge burn.
    pub bridge_lock_code_hash: String,
    /// Type script of the recipient cell. Its contract checks that the
    /// burned sUDT amount matches the cell data.
    pub recipient_type: ScriptShape,
    /// Multisig lock guarding the state cell and paying mint capacity.
    pub multisig_lock: ScriptShape,
    /// Type script that identifies the multisig state cell.
    pub multisig_state_type: ScriptShape,
    #[serde(default)]
    pub cell_deps: Vec<CellDep>,
    pub scripts: CkbScriptConfig,
    #[serde(default = "default_tx_fee")]
    pub tx_fee_shannons: u64,
    #[serde(default = "default_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

fn default_tx_fee() -> u64 {
    100_000
}

fn default_timeout_ms() -> u64 {
    30_000
}

pub struct CkbClient {
    transport: RpcTransport,
    indexer: RpcTransport,
    config: CkbClientConfig,
}

impl CkbClient {
    pub fn new(config: &CkbClientConfig) -> Result<Self, ChainError> {
        let timeout = Duration::from_millis(config.rpc_timeout_ms);
        let transport = RpcTransport::new(&config.rpc_url, timeout)?;
        let indexer_url = config.indexer_url.as_deref().unwrap_or(&config.rpc_url);
        let indexer = RpcTransport::new(indexer_url, timeout)?;
        Ok(Self {
            transport,
            indexer,
            config: config.clone(),
        })
    }

    pub fn scripts(&self) -> &CkbScriptConfig {
        &self.config.scripts
    }

    fn sudt_type(&self, chain: ChainKind, asset: &str) -> ScriptShape {
        ScriptShape {
            code_hash: normalize_hex(&self.config.scripts.sudt_code_hash),
            hash_type: "data".to_string(),
            args: sudt_owner_args(chain, asset),
        }
    }

    /// Reads the burn claimed by `tx`, if its first output is a recipient cell.
    ///
    /// The claim is only what the sender wrote; [`CkbClient::authenticate_burn`]
    /// checks it against the cells the transaction actually spends.
    fn decode_burn(&self, tx: &CkbTransaction) -> Option<BurnClaim> {
        let output = tx.outputs.first()?;
        if normalize_hex(&output.lock.code_hash) != normalize_hex(&self.config.bridge_lock_code_hash)
        {
            return None;
        }
        let recipient_type_ok = output.type_script.as_ref().map_or(false, |script| {
            normalize_hex(&script.code_hash) == normalize_hex(&self.config.recipient_type.code_hash)
        });
        if !recipient_type_ok {
            warn!("Ignoring bridge-locked cell in {} without the recipient type", tx.hash);
            return None;
        }
        let data = decode_hex(tx.outputs_data.first()?).ok()?;
        let cell = match RecipientCellData::decode(&data) {
            Ok(cell) => cell,
            Err(e) => {
                debug!("Ignoring bridge-locked cell in {} with bad data: {}", tx.hash, e);
                return None;
            }
        };
        let destination = ChainKind::from_recipient_cell_code(cell.chain)?;
        let asset = match destination {
            ChainKind::Ethereum => format!("0x{}", hex::encode(&cell.asset)),
            _ => String::from_utf8(cell.asset.clone()).ok()?,
        };
        let recipient = String::from_utf8(cell.recipient_address).ok()?;
        Some(BurnClaim {
            destination,
            asset,
            amount: cell.amount,
            recipient,
        })
    }

    /// Checks a claimed burn against the cells `tx` spends.
    ///
    /// The first input must be a bridged sUDT cell of the claimed asset, and
    /// the sUDT consumed (inputs minus outputs of that type) must equal the
    /// claimed amount. Returns the lock args of the first input as the sender.
    async fn authenticate_burn(
        &self,
        tx: &CkbTransaction,
        claim: &BurnClaim,
    ) -> Result<Option<String>, ChainError> {
        let sudt_type = self.sudt_type(claim.destination, &claim.asset);
        let mut previous_txs: HashMap<String, Option<TransactionView>> = HashMap::new();
        let mut sender = None;
        let mut consumed: u128 = 0;

        for (position, input) in tx.inputs.iter().enumerate() {
            let prev_hash = normalize_hex(&input.previous_output.tx_hash);
            if !previous_txs.contains_key(&prev_hash) {
                let view: Option<TransactionView> = self
                    .transport
                    .call_optional("get_transaction", json!([input.previous_output.tx_hash]))
                    .await?;
                previous_txs.insert(prev_hash.clone(), view);
            }
            let index = usize::try_from(parse_quantity(&input.previous_output.index)?)
                .map_err(|_| ChainError::Decode(format!("bad input index in {}", tx.hash)))?;
            let spent = previous_txs.get(&prev_hash).and_then(|view| {
                let view = view.as_ref()?;
                let output = view.transaction.outputs.get(index)?;
                let data = view.transaction.outputs_data.get(index)?;
                Some((output, data))
            });
            let (output, data) = match spent {
                Some(spent) => spent,
                None => {
                    warn!("Burn {} spends an unknown cell {}", tx.hash, prev_hash);
                    return Ok(None);
                }
            };
            let is_bridged_sudt = output
                .type_script
                .as_ref()
                .map_or(false, |script| same_script(script, &sudt_type));
            if position == 0 {
                if !is_bridged_sudt {
                    warn!(
                        "Burn {} does not spend bridged {} sUDT first",
                        tx.hash, claim.asset
                    );
                    return Ok(None);
                }
                sender = Some(output.lock.args.clone());
            }
            if is_bridged_sudt {
                consumed = match sudt_amount(data).and_then(|a| consumed.checked_add(a)) {
                    Some(total) => total,
                    None => return Ok(None),
                };
            }
        }

        let mut returned: u128 = 0;
        for (output, data) in tx.outputs.iter().zip(&tx.outputs_data) {
            let is_bridged_sudt = output
                .type_script
                .as_ref()
                .map_or(false, |script| same_script(script, &sudt_type));
            if is_bridged_sudt {
                returned = match sudt_amount(data).and_then(|a| returned.checked_add(a)) {
                    Some(total) => total,
                    None => return Ok(None),
                };
            }
        }

        let burned = consumed.saturating_sub(returned);
        if burned != claim.amount {
            warn!(
                "Burn {} claims {} {} but consumes {}",
                tx.hash, claim.amount, claim.asset, burned
            );
            return Ok(None);
        }
        Ok(sender)
    }

    async fn burn_events(
        &self,
        tx: &CkbTransaction,
        height: u64,
        timestamp: i64,
    ) -> Result<Vec<ChainEvent>, ChainError> {
        let claim = match self.decode_burn(tx) {
            Some(claim) => claim,
            None => return Ok(Vec::new()),
        };
        let sender = match self.authenticate_burn(tx, &claim).await? {
            Some(sender) => sender,
            None => return Ok(Vec::new()),
        };
        Ok(vec![ChainEvent {
            tx_id: tx.hash.clone(),
            index: 0,
            block_height: height,
            block_timestamp: timestamp,
            kind: EventKind::Burn {
                destination: claim.destination,
                asset: claim.asset,
                amount: claim.amount,
                sender,
                recipient: claim.recipient,
            },
        }])
    }

    async fn header(&self, block_hash: &str) -> Result<CkbHeader, ChainError> {
        self.transport.call("get_header", json!([block_hash])).await
    }

    async fn state_cell(&self) -> Result<IndexerCell, ChainError> {
        let search = json!({
            "script": self.config.multisig_state_type,
            "script_type": "type",
        });
        let page: IndexerPage = self
            .indexer
            .call("get_cells", json!([search, "asc", "0x1"]))
            .await?;
        page.objects
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::NotFound("multisig state cell".to_string()))
    }

    /// Builds an unsigned burn of `amount` bridged `asset` held by `sender_lock`.
    ///
    /// Inputs are the sender's sUDT cells, collected through the indexer until
    /// they cover `amount`. The first output is the recipient cell; any
    /// remaining balance goes back to the sender.
    pub async fn build_burn_transaction(
        &self,
        sender_lock: &ScriptShape,
        destination: ChainKind,
        asset: &str,
        amount: u128,
        recipient: &str,
        fee: u128,
    ) -> Result<serde_json::Value, ChainError> {
        let chain_code = destination.recipient_cell_code().ok_or_else(|| {
            ChainError::Unsupported(format!("{} is not a burn destination", destination))
        })?;
        let sudt_type = self.sudt_type(destination, asset);

        let mut inputs = Vec::new();
        let mut input_capacity: u64 = 0;
        let mut balance: u128 = 0;
        let mut cursor: Option<String> = None;
        while balance < amount {
            let search = json!({
                "script": sender_lock,
                "script_type": "lock",
                "filter": { "script": sudt_type },
            });
            let page: IndexerPage = self
                .indexer
                .call(
                    "get_cells",
                    json!([search, "asc", encode_quantity(INDEXER_PAGE), cursor]),
                )
                .await?;
            if page.objects.is_empty() {
                break;
            }
            for cell in page.objects {
                let data = decode_hex(&cell.output_data)?;
                let mut amount_bytes = [0u8; 16];
                if data.len() >= 16 {
                    amount_bytes.copy_from_slice(&data[..16]);
                }
                balance += u128::from_le_bytes(amount_bytes);
                input_capacity += parse_quantity(&cell.output.capacity)?;
                inputs.push(json!({ "previous_output": cell.out_point, "since": "0x0" }));
                if balance >= amount {
                    break;
                }
            }
            cursor = Some(page.last_cursor);
        }
        if balance < amount {
            return Err(ChainError::Rejected(format!(
                "insufficient {} balance: have {}, need {}",
                asset, balance, amount
            )));
        }

        let cell_data = RecipientCellData {
            recipient_address: recipient.as_bytes().to_vec(),
            chain: chain_code,
            asset: identity_bytes(asset),
            bridge_lock_code_hash: hash32(&self.config.bridge_lock_code_hash)?,
            owner_lock_hash: hash32(&sudt_type.args)?,
            amount,
            fee,
        };

        let cell_capacity = self.config.scripts.sudt_cell_capacity;
        let mut outputs = vec![json!({
            "capacity": encode_quantity(cell_capacity),
            "lock": {
                "code_hash": normalize_hex(&self.config.bridge_lock_code_hash),
                "hash_type": "type",
                "args": "0x",
            },
            "type": self.config.recipient_type,
        })];
        let mut outputs_data = vec![format!("0x{}", hex::encode(cell_data.encode()))];

        let change_capacity = input_capacity
            .checked_sub(cell_capacity + self.config.tx_fee_shannons)
            .ok_or_else(|| {
                ChainError::Rejected("sUDT cells do not cover the burn cell capacity".to_string())
            })?;
        if balance > amount || change_capacity > 0 {
            outputs.push(json!({
                "capacity": encode_quantity(change_capacity),
                "lock": sender_lock,
                "type": sudt_type,
            }));
            outputs_data.push(format!("0x{}", hex::encode((balance - amount).to_le_bytes())));
        }

        Ok(json!({
            "version": "0x0",
            "cell_deps": self.config.cell_deps,
            "header_deps": [],
            "inputs": inputs,
            "outputs": outputs,
            "outputs_data": outputs_data,
            "witnesses": [],
        }))
    }
}

/// What a bridge-locked recipient cell says was burned.
struct BurnClaim {
    destination: ChainKind,
    asset: String,
    amount: u128,
    recipient: String,
}

fn same_script(a: &ScriptShape, b: &ScriptShape) -> bool {
    normalize_hex(&a.code_hash) == normalize_hex(&b.code_hash)
        && a.hash_type == b.hash_type
        && normalize_hex(&a.args) == normalize_hex(&b.args)
}

/// sUDT amount: the first 16 bytes of cell data, little endian.
fn sudt_amount(data: &str) -> Option<u128> {
    let bytes = decode_hex(data).ok()?;
    let head: [u8; 16] = bytes.get(..16)?.try_into().ok()?;
    Some(u128::from_le_bytes(head))
}

fn hash32(value: &str) -> Result<[u8; 32], ChainError> {
    decode_hex(value)?
        .try_into()
        .map_err(|_| ChainError::Decode(format!("not a 32-byte hash: {}", value)))
}

fn state_nonce(data: &str) -> Result<u64, ChainError> {
    let bytes = decode_hex(data)?;
    let head: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ChainError::Decode("multisig state cell data is shorter than 8 bytes".to_string()))?;
    Ok(u64::from_le_bytes(head))
}

#[async_trait]
impl ChainClient for CkbClient {
    fn chain(&self) -> ChainKind {
        ChainKind::Nervos
    }

    async fn tip_height(&self) -> Result<u64, ChainError> {
        let tip: String = self.transport.call("get_tip_block_number", json!([])).await?;
        parse_quantity(&tip)
    }

    async fn block(&self, height: u64) -> Result<Option<ChainBlock>, ChainError> {
        let block: Option<CkbBlock> = self
            .transport
            .call_optional("get_block_by_number", json!([encode_quantity(height)]))
            .await?;
        let block = match block {
            Some(block) => block,
            None => return Ok(None),
        };

        let number = parse_quantity(&block.header.number)?;
        let timestamp = (parse_quantity(&block.header.timestamp)? / 1000) as i64;
        let mut events = Vec::new();
        // transactions[0] is the cellbase.
        for tx in block.transactions.iter().skip(1) {
            events.extend(self.burn_events(tx, number, timestamp).await?);
        }

        Ok(Some(ChainBlock {
            height: number,
            hash: block.header.hash,
            timestamp,
            events,
            system_only: block.transactions.len() <= 1,
        }))
    }

    async fn transaction(&self, tx_id: &str) -> Result<Option<ObservedTransaction>, ChainError> {
        let view: Option<TransactionView> = self
            .transport
            .call_optional("get_transaction", json!([normalize_hex(tx_id)]))
            .await?;
        let view = match view {
            Some(view) => view,
            None => return Ok(None),
        };

        let (status, header) = match (view.tx_status.status.as_str(), &view.tx_status.block_hash) {
            ("committed", Some(hash)) => (TxStatus::Committed, Some(self.header(hash).await?)),
            ("rejected", _) => (TxStatus::Failed, None),
            ("unknown", _) => return Ok(None),
            _ => (TxStatus::Pending, None),
        };

        let (block_height, block_timestamp, confirmations, events) = match header {
            Some(header) => {
                let height = parse_quantity(&header.number)?;
                let timestamp = (parse_quantity(&header.timestamp)? / 1000) as i64;
                let tip = self.tip_height().await?;
                let events = self.burn_events(&view.transaction, height, timestamp).await?;
                (
                    Some(height),
                    Some(timestamp),
                    tip.saturating_sub(height) + 1,
                    events,
                )
            }
            None => (None, None, 0, Vec::new()),
        };

        Ok(Some(ObservedTransaction {
            tx_id: view.transaction.hash,
            block_height,
            block_timestamp,
            confirmations,
            status,
            events,
        }))
    }

    async fn multisig_nonce(&self) -> Result<Option<u64>, ChainError> {
        let cell = self.state_cell().await?;
        Ok(Some(state_nonce(&cell.output_data)?))
    }

    /// Spends the multisig state cell, bumping its nonce, and creates the mint
    /// outputs carried in the batch's raw transaction.
    async fn submit_multisig(&self, batch: &SignedBatch) -> Result<String, ChainError> {
        if batch.kind != TransferKind::Mint {
            return Err(ChainError::Unsupported(
                "the home ledger only settles mints".to_string(),
            ));
        }
        let raw = batch
            .raw_transaction
            .clone()
            .ok_or_else(|| ChainError::Rejected("mint batch has no raw transaction".to_string()))?;
        let mint: MintTransaction = serde_json::from_value(raw)
            .map_err(|e| ChainError::Rejected(format!("malformed mint transaction: {}", e)))?;
        if mint.nonce != batch.nonce || mint.outputs.len() != batch.records.len() {
            return Err(ChainError::Rejected(
                "mint transaction does not match the signed batch".to_string(),
            ));
        }

        let state = self.state_cell().await?;
        let current = state_nonce(&state.output_data)?;
        if current != batch.nonce {
            return Err(ChainError::Rejected(format!(
                "nonce mismatch: chain at {}, batch signed for {}",
                current, batch.nonce
            )));
        }

        let mut spent: u64 = self.config.tx_fee_shannons;
        for output in &mint.outputs {
            spent += parse_quantity(&output.capacity)?;
        }
        let state_capacity = parse_quantity(&state.output.capacity)?;
        let remaining = state_capacity.checked_sub(spent).ok_or_else(|| {
            ChainError::Rejected(format!(
                "state cell holds {} shannons, mint needs {}",
                state_capacity, spent
            ))
        })?;

        let mut outputs: Vec<serde_json::Value> = mint
            .outputs
            .iter()
            .map(|o| json!({ "capacity": o.capacity, "lock": o.lock, "type": o.type_script }))
            .collect();
        let mut outputs_data: Vec<String> = mint.outputs.iter().map(|o| o.data.clone()).collect();
        outputs.push(json!({
            "capacity": encode_quantity(remaining),
            "lock": self.config.multisig_lock,
            "type": self.config.multisig_state_type,
        }));
        outputs_data.push(format!("0x{}", hex::encode((current + 1).to_le_bytes())));

        let signatures: Vec<u8> = batch.signatures.concat();
        let witness = format!("0x{}", hex::encode(witness_args_with_lock(&signatures)));

        let tx = json!({
            "version": "0x0",
            "cell_deps": self.config.cell_deps,
            "header_deps": [],
            "inputs": [{ "previous_output": state.out_point, "since": "0x0" }],
            "outputs": outputs,
            "outputs_data": outputs_data,
            "witnesses": [witness],
        });

        let hash: String = self
            .transport
            .call("send_transaction", json!([tx, "passthrough"]))
            .await
            .map_err(|e| match e {
                // -3xx: verification and pool rejections; -1107: duplicated
                ChainError::Rpc { code, message } if code <= -300 => {
                    ChainError::Rejected(format!("{} (code {})", message, code))
                }
                other => other,
            })?;
        info!(
            "Submitted mint of {} records at nonce {}, tx={}",
            batch.records.len(),
            batch.nonce,
            hash
        );
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_nonce_reads_little_endian_prefix() {
        assert_eq!(state_nonce("0x0500000000000000ff").unwrap(), 5);
        assert!(state_nonce("0x0500").is_err());
    }
}
