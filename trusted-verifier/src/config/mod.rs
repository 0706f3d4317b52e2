//! Configuration Management Module
//!
//! Loads the verifier's TOML configuration: its own view of every chain, the
//! signing domains, the fee table and the API listener. The verifier never
//! reads the collector's configuration; every value that affects what it
//! signs is configured here independently.

use serde::{Deserialize, Serialize};

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
    pub verifier: VerifierConfig,
    pub api: ApiConfig,
    /// Home ledger: source of burns, destination of mints.
    pub nervos: ChainSection<CkbClientConfig>,
    #[serde(default)]
    pub ethereum: Option<ChainSection<EvmClientConfig>>,
    #[serde(default)]
    pub bitcoin: Option<ChainSection<BtcClientConfig>>,
    #[serde(default)]
    pub fees: FeeTable,
}

/// One chain as this verifier sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSection<C> {
    pub client: C,
    /// Blocks a source transaction must be buried under before it is signed for.
    pub confirmations: u64,
    /// Signing domain of batches submitted to this chain.
    pub domain: DomainConfig,
}

/// Verifier-specific configuration.
///
/// The private key itself is never part of the file; only the name of the
/// environment variable that holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Environment variable holding the base64 secp256k1 private key
    pub private_key_env: String,
    /// Expected signer address; checked against the key at startup when set
    #[serde(default)]
    pub address: Option<String>,
    /// SQLite file of the signed payload table
    pub store_path: String,
}

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl VerifierConfig {
    /// Reads the private key from the configured environment variable.
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' with the verifier private key is not set",
                self.private_key_env
            )
        })
    }
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    pub fn confirmations(&self, chain: ChainKind) -> Option<u64> {
        match chain {
            ChainKind::Nervos => Some(self.nervos.confirmations),
            ChainKind::Ethereum => self.ethereum.as_ref().map(|c| c.confirmations),
            ChainKind::Bitcoin => self.bitcoin.as_ref().map(|c| c.confirmations),
        }
    }

    pub fn domain(&self, chain: ChainKind) -> Option<&DomainConfig> {
        match chain {
            ChainKind::Nervos => Some(&self.nervos.domain),
            ChainKind::Ethereum => self.ethereum.as_ref().map(|c| &c.domain),
            ChainKind::Bitcoin => self.bitcoin.as_ref().map(|c| &c.domain),
        }
    }

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

    /// Rejects configurations the verifier must not run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.foreign_chains().is_empty() {
            anyhow::bail!("Configuration error: configure at least one of [ethereum] or [bitcoin]");
        }
        for chain in std::iter::once(ChainKind::Nervos).chain(self.foreign_chains()) {
            if self.confirmations(chain) == Some(0) {
                anyhow::bail!("Configuration error: {} confirmations must be at least 1", chain);
            }
        }
        for policy in &self.fees.assets {
            if policy.chain == ChainKind::Nervos || self.confirmations(policy.chain).is_none() {
                anyhow::bail!(
                    "Configuration error: fee entry for {} on {} but that chain is not configured",
                    policy.asset,
                    policy.chain
                );
            }
        }
        if self.verifier.private_key_env.is_empty() {
            anyhow::bail!("Configuration error: verifier.private_key_env is empty");
        }
        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// The path comes from `VERIFIER_CONFIG_PATH`, falling back to
    /// `config/verifier.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("VERIFIER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/verifier.toml".to_string());
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
                cp config/verifier.template.toml config/verifier.toml\n\
                Then edit config/verifier.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// For local development only: every address, code hash and domain must
    /// match the deployed contracts before the verifier can sign anything
    /// useful.
    #[allow(dead_code)]
    pub fn default() -> Self {
        let placeholder_script = |byte: &str| ScriptShape {
            code_hash: format!("0x{}", byte.repeat(32)),
            hash_type: "type".to_string(),
            args: "0x".to_string(),
        };
        Self {
            verifier: VerifierConfig {
                private_key_env: "VERIFIER_PRIVATE_KEY".to_string(),
                address: None,
                store_path: "data/verifier.db".to_string(),
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 3334,
                cors_origins: Vec::new(),
            },
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
                domain: DomainConfig {
                    name: "BridgeRelay".to_string(),
                    version: "1".to_string(),
                    chain_id: 31337,
                    verifying_contract: "0x0000000000000000000000000000000000000001".to_string(),
                },
            }),
            bitcoin: None,
            fees: FeeTable::default(),
        }
    }
}
