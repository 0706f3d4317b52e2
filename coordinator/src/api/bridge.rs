//! Bridge methods of the collector API.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use bridge_protocol::ckb_shape::{sudt_owner_args, ScriptShape};
use bridge_protocol::{Assessment, FeeTable};
use chain_clients_btc::BtcClient;
use chain_clients_ckb::CkbClient;
use chain_clients_common::{ChainKind, TransferKind};
use chain_clients_evm::EvmClient;

use super::rpc::{params, RpcError, RpcRequest};
use crate::ledger::{Ledger, TransferStatus, TransferView};
use crate::reconciliation::ReconciliationChecker;

/// Chain clients the API builds transactions with.
#[derive(Clone)]
pub struct BridgeChains {
    pub nervos: Arc<CkbClient>,
    pub ethereum: Option<Arc<EvmClient>>,
    pub bitcoin: Option<Arc<BtcClient>>,
}

/// Everything the RPC methods need, built once by the server.
pub struct BridgeApi {
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) chains: BridgeChains,
    pub(crate) fees: FeeTable,
    pub(crate) reconciliation: Arc<ReconciliationChecker>,
    pub(crate) admin_key: Option<String>,
}

// ============================================================================
// REQUEST AND RESPONSE SHAPES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetParam {
    network: String,
    ident: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeInParams {
    #[allow(dead_code)]
    sender: String,
    recipient: String,
    asset: AssetParam,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SenderParam {
    Args(String),
    Script(ScriptShape),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeOutParams {
    network: String,
    sender: SenderParam,
    recipient: String,
    asset: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryParams {
    network: String,
    user_ident: String,
    xchain_asset_ident: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasSwitchParams {
    key: String,
    gas_price_gwei_auto: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryParams {
    key: String,
    kind: TransferKind,
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AdminParams {
    key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetAmount {
    pub network: ChainKind,
    pub ident: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FromTransaction {
    pub tx_id: String,
    pub timestamp: i64,
    pub confirm_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToTransaction {
    pub tx_id: String,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    pub from_asset: AssetAmount,
    pub to_asset: AssetAmount,
    pub sender: String,
    pub recipient: String,
    pub from_transaction: FromTransaction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_transaction: Option<ToTransaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryStatus {
    Pending,
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub status: SummaryStatus,
    pub tx_summary: TxSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_chain(network: &str) -> Result<ChainKind, RpcError> {
    network.parse().map_err(RpcError::invalid_params)
}

fn parse_amount(raw: &str) -> Result<u128, RpcError> {
    raw.trim()
        .parse::<u128>()
        .map_err(|e| RpcError::invalid_params(format!("invalid amount {}: {}", raw, e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}

/// Compares without short-circuiting on the first differing byte.
fn keys_match(given: &str, expected: &str) -> bool {
    let (a, b) = (given.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

fn summary_status(status: TransferStatus) -> SummaryStatus {
    match status {
        TransferStatus::Todo | TransferStatus::Pending => SummaryStatus::Pending,
        TransferStatus::Success => SummaryStatus::Successful,
        TransferStatus::Error => SummaryStatus::Failed,
    }
}

fn summarize(view: TransferView) -> TransactionSummary {
    let TransferView { origin, record } = view;
    let bridged_ident = sudt_owner_args(record.chain, &record.asset);
    let (from_asset, to_asset) = match record.kind {
        TransferKind::Mint => (
            AssetAmount {
                network: record.chain,
                ident: origin.asset.clone(),
                amount: origin.amount.to_string(),
            },
            AssetAmount {
                network: ChainKind::Nervos,
                ident: bridged_ident,
                amount: record.amount.to_string(),
            },
        ),
        TransferKind::Unlock => (
            AssetAmount {
                network: ChainKind::Nervos,
                ident: bridged_ident,
                amount: origin.amount.to_string(),
            },
            AssetAmount {
                network: record.chain,
                ident: record.asset.clone(),
                amount: record.amount.to_string(),
            },
        ),
    };

    let to_transaction = match (record.status, &record.destination_tx) {
        (TransferStatus::Success, Some(tx_id)) => Some(ToTransaction {
            tx_id: tx_id.clone(),
            timestamp: record.destination_timestamp,
        }),
        _ => None,
    };

    TransactionSummary {
        status: summary_status(record.status),
        message: match record.status {
            TransferStatus::Error => record.message.clone(),
            _ => None,
        },
        tx_summary: TxSummary {
            from_asset,
            to_asset,
            sender: origin.sender,
            recipient: record.recipient,
            from_transaction: FromTransaction {
                tx_id: origin.tx_id,
                timestamp: origin.timestamp,
                confirm_status: "confirmed".to_string(),
            },
            to_transaction,
        },
    }
}

// ============================================================================
// METHODS
// ============================================================================

impl BridgeApi {
    pub(crate) async fn dispatch(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        match request.method.as_str() {
            "generateBridgeInNervosTransaction" => self.generate_bridge_in(request),
            "generateBridgeOutNervosTransaction" => self.generate_bridge_out(request).await,
            "getBridgeTransactionSummaries" => self.transaction_summaries(request),
            "switchGasPriceGweiAuto" => self.switch_gas_price(request),
            "retryFailedTransfers" => self.retry_failed(request),
            "getReconciliationReport" => self.reconciliation_report(request),
            other => Err(RpcError::new(
                super::rpc::METHOD_NOT_FOUND,
                format!("method {} not found", other),
            )),
        }
    }

    fn authorize(&self, key: &str) -> Result<(), RpcError> {
        match &self.admin_key {
            Some(expected) if keys_match(key, expected) => Ok(()),
            _ => {
                warn!("Rejected admin call with an invalid key");
                Err(RpcError::unauthorized())
            }
        }
    }

    fn accepted_fee(&self, chain: ChainKind, asset: &str, amount: u128) -> Result<u128, RpcError> {
        match self.fees.assess(chain, asset, amount) {
            Assessment::Accepted { fee, .. } => Ok(fee),
            Assessment::Rejected { reason } => Err(RpcError::invalid_params(reason)),
        }
    }

    /// Unsigned lock transaction on the foreign chain.
    fn generate_bridge_in(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: BridgeInParams = params(request)?;
        let chain = parse_chain(&p.asset.network)?;
        let amount = parse_amount(&p.asset.amount)?;
        self.accepted_fee(chain, &p.asset.ident, amount)?;

        let raw_transaction = match chain {
            ChainKind::Ethereum => {
                let evm = self
                    .chains
                    .ethereum
                    .as_ref()
                    .ok_or_else(|| RpcError::invalid_params("ethereum is not configured"))?;
                let tx = evm
                    .build_lock_transaction(&p.asset.ident, amount, &p.recipient, "")
                    .map_err(|e| RpcError::invalid_params(e.to_string()))?;
                to_json(&tx)?
            }
            ChainKind::Bitcoin => {
                let btc = self
                    .chains
                    .bitcoin
                    .as_ref()
                    .ok_or_else(|| RpcError::invalid_params("bitcoin is not configured"))?;
                to_json(&btc.build_lock_payment(amount, &p.recipient))?
            }
            ChainKind::Nervos => {
                return Err(RpcError::invalid_params(
                    "bridge-in starts on a foreign chain",
                ))
            }
        };
        Ok(json!({ "network": chain, "rawTransaction": raw_transaction }))
    }

    /// Unsigned burn on the home ledger.
    async fn generate_bridge_out(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: BridgeOutParams = params(request)?;
        let destination = parse_chain(&p.network)?;
        if destination == ChainKind::Nervos {
            return Err(RpcError::invalid_params("bridge-out pays out on a foreign chain"));
        }
        let amount = parse_amount(&p.amount)?;
        let fee = self.accepted_fee(destination, &p.asset, amount)?;

        let sender_lock = match p.sender {
            SenderParam::Script(script) => script,
            SenderParam::Args(args) => ScriptShape {
                code_hash: self.chains.nervos.scripts().recipient_lock_code_hash.clone(),
                hash_type: "type".to_string(),
                args,
            },
        };
        let raw_transaction = self
            .chains
            .nervos
            .build_burn_transaction(&sender_lock, destination, &p.asset, amount, &p.recipient, fee)
            .await
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        Ok(json!({ "network": ChainKind::Nervos, "rawTransaction": raw_transaction }))
    }

    /// Transfers where the user is the origin sender or the recipient.
    fn transaction_summaries(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: SummaryParams = params(request)?;
        let chain = parse_chain(&p.network)?;
        let internal = |e: crate::ledger::LedgerError| RpcError::internal(e.to_string());

        let mut views = self
            .ledger
            .summaries_for_sender(chain, &p.user_ident, &p.xchain_asset_ident)
            .map_err(internal)?;
        views.extend(
            self.ledger
                .summaries_for_recipient(chain, &p.user_ident, &p.xchain_asset_ident)
                .map_err(internal)?,
        );

        let mut seen = HashSet::new();
        let mut summaries: Vec<TransactionSummary> = views
            .into_iter()
            .filter(|v| seen.insert((v.record.kind, v.record.id.clone())))
            .map(summarize)
            .collect();
        summaries.sort_by(|a, b| {
            b.tx_summary
                .from_transaction
                .timestamp
                .cmp(&a.tx_summary.from_transaction.timestamp)
        });
        to_json(&summaries)
    }

    fn switch_gas_price(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: GasSwitchParams = params(request)?;
        self.authorize(&p.key)?;
        let evm = self
            .chains
            .ethereum
            .as_ref()
            .ok_or_else(|| RpcError::invalid_params("ethereum is not configured"))?;
        evm.gas_price_switch()
            .store(p.gas_price_gwei_auto, Ordering::SeqCst);
        info!("Automatic gas pricing set to {}", p.gas_price_gwei_auto);
        Ok(json!({ "gasPriceGweiAuto": p.gas_price_gwei_auto }))
    }

    fn retry_failed(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: RetryParams = params(request)?;
        self.authorize(&p.key)?;
        let requeued = self
            .ledger
            .retry_failed(p.kind, &p.ids)
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({ "requeued": requeued }))
    }

    fn reconciliation_report(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let p: AdminParams = params(request)?;
        self.authorize(&p.key)?;
        let report = self
            .reconciliation
            .check()
            .map_err(|e| RpcError::internal(e.to_string()))?;
        to_json(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::keys_match;

    #[test]
    fn key_comparison() {
        assert!(keys_match("s3cret", "s3cret"));
        assert!(!keys_match("s3cret", "s3cres"));
        assert!(!keys_match("s3cret", "s3cret-longer"));
        assert!(!keys_match("", "s3cret"));
    }
}
