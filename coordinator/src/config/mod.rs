//! Configuration Management Module
//!
//! Loads the collector's TOML configuration: chain endpoints, watcher timing,
//! the verifier set, the fee table and the API listener.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use bridge_protocol::ckb_shape::{CkbScriptConfig, ScriptShape};
use bridge_protocol::{DomainConfig, FeeTable};
use chain_clients_btc::BtcClientConfig;
use chain_clients_ckb::CkbClientConfig;
use chain_clients_common::ChainKind;
use chain_clients_evm::EvmClientConfig;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Home ledger. Always present; every transfer mints or burns here.
    pub nervos: ChainSection<CkbClientConfig>,
    #[serde(default)]
    pub ethereum: Option<ChainSection<EvmClientConfig>>,
    #[serde(default)]
    pub bitcoin: Option<ChainSection<BtcClientConfig>>,
    pub multisig: MultisigConfig,
    #[serde(default)]
    pub fees: FeeTable,
    pub admin: AdminConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// One chain: client settings plus what the relay needs to watch and sign for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection<C> {
    pub client: C,
    /// Blocks an event must be buried under before it is ingested.
    pub confirmations: u64,
    /// First height scanned when no watermark is stored.
    #[serde(default)]
    pub start_height: u64,
    /// Signing domain of batches submitted to this chain.
    pub domain: DomainConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// SQLite database file.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_times")]
    pub max_retry_times: u32,
    /// Block range of one log query on account-model chains.
    #[serde(default = "default_range_batch")]
    pub batch_size: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_times: default_max_retry_times(),
            batch_size: default_range_batch(),
        }
    }
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_times() -> u32 {
    5
}

fn default_range_batch() -> u64 {
    100
}

/// A verifier node the collector asks for signatures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierPeerConfig {
    pub name: String,
    pub url: String,
    /// Address recovered from this peer's signatures.
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultisigConfig {
    /// Signatures required (M of the N verifiers).
    pub threshold: usize,
    pub verifiers: Vec<VerifierPeerConfig>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Oldest `todo` age after which a partial batch is proposed anyway.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per verifier within one round.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Submissions tried, each with a fresh nonce and signatures, before the
    /// batch is failed.
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    /// Pending rows claimed longer ago than this are returned to `todo`.
    #[serde(default = "default_stale_pending_ms")]
    pub stale_pending_ms: u64,
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
}

fn default_batch_size() -> usize {
    20
}

fn default_max_wait_ms() -> u64 {
    60_000
}

fn default_round_timeout_ms() -> u64 {
    60_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_submit_attempts() -> u32 {
    3
}

fn default_confirm_timeout_ms() -> u64 {
    600_000
}

fn default_stale_pending_ms() -> u64 {
    1_800_000
}

fn default_cycle_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the shared admin secret.
    pub key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconciliation_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_reconciliation_interval_ms(),
        }
    }
}

fn default_reconciliation_interval_ms() -> u64 {
    300_000
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Foreign chains that are configured, in a fixed order.
    pub fn foreign_chains(&self) -> Vec<ChainKind> {
        let mut chains = Vec::new();
        if self.ethereum.is_some() {
            chains.push(ChainKind::Ethereum);
        }
        if self.bitcoin.is_some() {
            chains.push(ChainKind::Bitcoin);
        }
        chains
    }

    /// Signing domain for batches submitted to `chain`.
    pub fn domain(&self, chain: ChainKind) -> Option<&DomainConfig> {
        match chain {
            ChainKind::Nervos => Some(&self.nervos.domain),
            ChainKind::Ethereum => self.ethereum.as_ref().map(|c| &c.domain),
            ChainKind::Bitcoin => self.bitcoin.as_ref().map(|c| &c.domain),
        }
    }

    pub fn confirmations(&self, chain: ChainKind) -> Option<u64> {
        match chain {
            ChainKind::Nervos => Some(self.nervos.confirmations),
            ChainKind::Ethereum => self.ethereum.as_ref().map(|c| c.confirmations),
            ChainKind::Bitcoin => self.bitcoin.as_ref().map(|c| c.confirmations),
        }
    }

    pub fn start_height(&self, chain: ChainKind) -> u64 {
        match chain {
            ChainKind::Nervos => self.nervos.start_height,
            ChainKind::Ethereum => self.ethereum.as_ref().map_or(0, |c| c.start_height),
            ChainKind::Bitcoin => self.bitcoin.as_ref().map_or(0, |c| c.start_height),
        }
    }

    /// Validates the verifier set, batch settings and fee table.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - The first problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        let multisig = &self.multisig;
        if multisig.verifiers.is_empty() {
            anyhow::bail!("Configuration error: no verifiers configured");
        }
        if multisig.threshold == 0 || multisig.threshold > multisig.verifiers.len() {
            anyhow::bail!(
                "Configuration error: threshold {} must be between 1 and the number of verifiers ({})",
                multisig.threshold,
                multisig.verifiers.len()
            );
        }

        let mut addresses = HashSet::new();
        let mut urls = HashSet::new();
        for peer in &multisig.verifiers {
            if !addresses.insert(peer.address.to_ascii_lowercase()) {
                anyhow::bail!(
                    "Configuration error: verifier address {} appears more than once",
                    peer.address
                );
            }
            if !urls.insert(peer.url.trim_end_matches('/').to_string()) {
                anyhow::bail!("Configuration error: verifier URL {} appears more than once", peer.url);
            }
        }

        if multisig.batch_size == 0 {
            anyhow::bail!("Configuration error: multisig.batch_size must be at least 1");
        }
        if self.watcher.batch_size == 0 {
            anyhow::bail!("Configuration error: watcher.batch_size must be at least 1");
        }
        if self.foreign_chains().is_empty() {
            anyhow::bail!("Configuration error: configure at least one of [ethereum] or [bitcoin]");
        }

        for chain in std::iter::once(ChainKind::Nervos).chain(self.foreign_chains()) {
            if self.confirmations(chain) == Some(0) {
                anyhow::bail!("Configuration error: {} confirmations must be at least 1", chain);
            }
        }

        let configured: HashSet<ChainKind> = self.foreign_chains().into_iter().collect();
        for policy in &self.fees.assets {
            if !configured.contains(&policy.chain) {
                anyhow::bail!(
                    "Configuration error: fee entry for {} on {} but that chain is not configured",
                    policy.asset,
                    policy.chain
                );
            }
        }

        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path comes from `COORDINATOR_CONFIG_PATH`, falling back to
    /// `config/coordinator.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("COORDINATOR_CONFIG_PATH")
            .unwrap_or_else(|_| "config/coordinator.toml".to_string());
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &str) -> anyhow::Result<Self> {
        if std::path::Path::new(config_path).exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/coordinator.template.toml config/coordinator.toml\n\
                Then edit config/coordinator.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// Suitable for local development only: every address, code hash and
    /// verifier entry must be replaced before use.
    #[allow(dead_code)]
    pub fn default() -> Self {
        let placeholder_script = |byte: &str| ScriptShape {
            code_hash: format!("0x{}", byte.repeat(32)),
            hash_type: "type".to_string(),
            args: "0x".to_string(),
        };
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3030,
                cors_origins: vec!["http://localhost:3000".to_string()],
            },
            ledger: LedgerConfig {
                path: "data/coordinator.db".to_string(),
            },
            watcher: WatcherConfig::default(),
            nervos: ChainSection {
                client: CkbClientConfig {
                    rpc_url: "http://127.0.0.1:8114".to_string(),
                    indexer_url: None,
                    bridge_lock_code_hash: format!("0x{}", "01".repeat(32)),
                    recipient_type: placeholder_script("05"),
                    multisig_lock: placeholder_script("02"),
                    multisig_state_type: placeholder_script("03"),
                    cell_deps: Vec::new(),
                    scripts: CkbScriptConfig {
                        recipient_lock_code_hash: format!("0x{}", "9b".repeat(32)),
                        sudt_code_hash: format!("0x{}", "04".repeat(32)),
                        sudt_cell_capacity: 142_0000_0000,
                    },
                    tx_fee_shannons: 100_000,
                    rpc_timeout_ms: 30_000,
                },
                confirmations: 15,
                start_height: 0,
                domain: DomainConfig {
                    name: "BridgeRelay".to_string(),
                    version: "1".to_string(),
                    chain_id: 0,
                    verifying_contract: "0x0000000000000000000000000000000000000000".to_string(),
                },
            },
            ethereum: Some(ChainSection {
                client: EvmClientConfig {
                    rpc_url: "http://127.0.0.1:8545".to_string(),
                    bridge_contract: "0x0000000000000000000000000000000000000001".to_string(),
                    relayer_address: "0x0000000000000000000000000000000000000002".to_string(),
                    gas_price_gwei: 20,
                    rpc_timeout_ms: 30_000,
                },
                confirmations: 12,
                start_height: 0,
                domain: DomainConfig {
                    name: "BridgeRelay".to_string(),
                    version: "1".to_string(),
                    chain_id: 31337,
                    verifying_contract: "0x0000000000000000000000000000000000000001".to_string(),
                },
            }),
            bitcoin: None,
            multisig: MultisigConfig {
                threshold: 1,
                verifiers: vec![VerifierPeerConfig {
                    name: "verifier-1".to_string(),
                    url: "http://127.0.0.1:3334".to_string(),
                    address: "0x0000000000000000000000000000000000000003".to_string(),
                }],
                batch_size: default_batch_size(),
                max_wait_ms: default_max_wait_ms(),
                round_timeout_ms: default_round_timeout_ms(),
                request_timeout_ms: default_request_timeout_ms(),
                max_attempts: default_max_attempts(),
                retry_delay_ms: default_retry_delay_ms(),
                max_submit_attempts: default_max_submit_attempts(),
                confirm_timeout_ms: default_confirm_timeout_ms(),
                stale_pending_ms: default_stale_pending_ms(),
                cycle_interval_ms: default_cycle_interval_ms(),
            },
            fees: FeeTable::default(),
            admin: AdminConfig {
                key_env: "BRIDGE_ADMIN_KEY".to_string(),
            },
            reconciliation: ReconciliationConfig::default(),
        }
    }
}
