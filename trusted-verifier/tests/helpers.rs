//! Shared test helpers for verifier tests
//!
//! - **Chains**: in-memory home ledger, Ethereum and Bitcoin with helpers that
//!   mine bridge events and bury them
//! - **Signers**: a `SignerService` wired to those chains with a fixed key
//! - **Proposals**: proposals built the way an honest collector builds them

use std::collections::HashMap;
use std::sync::Arc;

use bridge_protocol::ckb_shape::{build_mint_transaction, CkbScriptConfig, ScriptShape};
use bridge_protocol::{AssetPolicy, DomainConfig, DomainSeparator, FeeTable, Proposal};
use chain_clients_btc::BtcClientConfig;
use chain_clients_ckb::CkbClientConfig;
use chain_clients_common::memory::MemoryChain;
use chain_clients_common::{ChainClient, ChainKind, EventKind, TransferKind, TransferRecord};
use chain_clients_evm::EvmClientConfig;
use trusted_verifier::config::{ApiConfig, ChainSection, Config, VerifierConfig};
use trusted_verifier::verifiers::{BtcLockVerifier, CkbBurnVerifier, EvmLockVerifier};
use trusted_verifier::{CryptoService, SignedStore, SignerService, TransferVerifier};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Bridged ERC-20 token
pub const ETH_TOKEN: &str = "0x00000000000000000000000000000000000000aa";

/// Lock sender on Ethereum
pub const ETH_SENDER: &str = "0x0000000000000000000000000000000000000005";

/// Home-ledger lock args receiving mints
pub const CKB_RECIPIENT: &str = "0x00000000000000000000000000000000000000cc";

/// Ethereum address receiving unlocks
pub const ETH_RECIPIENT: &str = "0x00000000000000000000000000000000000000ee";

/// Bitcoin address receiving unlocks
pub const BTC_RECIPIENT: &str = "bcrt1qrecipient0000000000000000000000000000";

/// Blocks every source event must be buried under
pub const CONFIRMATIONS: u64 = 1;

// ============================================================================
// CHAINS
// ============================================================================

pub struct TestChains {
    pub nervos: Arc<MemoryChain>,
    pub ethereum: Arc<MemoryChain>,
    pub bitcoin: Arc<MemoryChain>,
}

impl TestChains {
    /// Home ledger and Ethereum keep an on-chain nonce starting at 0;
    /// Bitcoin keeps none.
    pub fn new() -> Self {
        Self {
            nervos: Arc::new(MemoryChain::new(ChainKind::Nervos).with_nonce(0)),
            ethereum: Arc::new(MemoryChain::new(ChainKind::Ethereum).with_nonce(0)),
            bitcoin: Arc::new(MemoryChain::new(ChainKind::Bitcoin)),
        }
    }

    pub fn client(&self, chain: ChainKind) -> Arc<dyn ChainClient> {
        match chain {
            ChainKind::Nervos => self.nervos.clone(),
            ChainKind::Ethereum => self.ethereum.clone(),
            ChainKind::Bitcoin => self.bitcoin.clone(),
        }
    }
}

fn tx_hash(seed: u64) -> String {
    format!("0x{:064x}", seed)
}

/// Mines a lock of `amount` tokens in tx `seed` and buries it. Returns the
/// lock reference.
pub fn lock_on_ethereum(chains: &TestChains, seed: u64, amount: u128) -> String {
    let tx = tx_hash(seed);
    chains.ethereum.mine(vec![(
        tx.clone(),
        0,
        EventKind::Lock {
            asset: ETH_TOKEN.to_string(),
            amount,
            sender: ETH_SENDER.to_string(),
            recipient: CKB_RECIPIENT.to_string(),
            extra_data: String::new(),
        },
    )]);
    chains.ethereum.mine_empty(CONFIRMATIONS);
    format!("{}#0", tx)
}

pub fn lock_on_bitcoin(chains: &TestChains, seed: u64, amount: u128) -> String {
    let txid = format!("{:064x}", seed);
    chains.bitcoin.mine(vec![(
        txid.clone(),
        0,
        EventKind::Lock {
            asset: "btc".to_string(),
            amount,
            sender: "bcrt1qsender".to_string(),
            recipient: CKB_RECIPIENT.to_string(),
            extra_data: String::new(),
        },
    )]);
    chains.bitcoin.mine_empty(CONFIRMATIONS);
    format!("{}#0", txid)
}

/// Mines a burn on the home ledger paying out on `destination`. Returns the
/// burn hash.
pub fn burn_on_nervos(chains: &TestChains, seed: u64, destination: ChainKind, amount: u128) -> String {
    let tx = tx_hash(seed);
    let (asset, recipient) = match destination {
        ChainKind::Bitcoin => ("btc", BTC_RECIPIENT),
        _ => (ETH_TOKEN, ETH_RECIPIENT),
    };
    chains.nervos.mine(vec![(
        tx.clone(),
        0,
        EventKind::Burn {
            destination,
            asset: asset.to_string(),
            amount,
            sender: CKB_RECIPIENT.to_string(),
            recipient: recipient.to_string(),
        },
    )]);
    chains.nervos.mine_empty(CONFIRMATIONS);
    tx
}

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

pub fn fee_table() -> FeeTable {
    FeeTable::new(vec![
        AssetPolicy {
            chain: ChainKind::Ethereum,
            asset: ETH_TOKEN.to_string(),
            minimum: 1_000,
            fee: 100,
        },
        AssetPolicy {
            chain: ChainKind::Bitcoin,
            asset: "btc".to_string(),
            minimum: 10_000,
            fee: 1_000,
        },
    ])
}

pub fn domain_config(chain: ChainKind) -> DomainConfig {
    DomainConfig {
        name: "BridgeRelay".to_string(),
        version: "1".to_string(),
        chain_id: match chain {
            ChainKind::Nervos => 0,
            ChainKind::Ethereum => 31337,
            ChainKind::Bitcoin => 8332,
        },
        verifying_contract: "0x0000000000000000000000000000000000000b0b".to_string(),
    }
}

pub fn ckb_scripts() -> CkbScriptConfig {
    CkbScriptConfig {
        recipient_lock_code_hash: format!("0x{}", "9b".repeat(32)),
        sudt_code_hash: format!("0x{}", "04".repeat(32)),
        sudt_cell_capacity: 142_0000_0000,
    }
}

/// Deterministic key for verifier number `index`.
pub fn test_key(index: u8) -> CryptoService {
    CryptoService::from_key_bytes(&[index.wrapping_add(1); 32]).unwrap()
}

/// Verifier wired to the in-memory chains.
pub fn build_signer(index: u8, chains: &TestChains, store: Arc<SignedStore>) -> SignerService {
    let fees = fee_table();
    let verifiers: Vec<Arc<dyn TransferVerifier>> = vec![
        Arc::new(CkbBurnVerifier::new(chains.client(ChainKind::Nervos), CONFIRMATIONS, fees.clone())),
        Arc::new(EvmLockVerifier::new(chains.client(ChainKind::Ethereum), CONFIRMATIONS, fees.clone())),
        Arc::new(BtcLockVerifier::new(chains.client(ChainKind::Bitcoin), CONFIRMATIONS, fees)),
    ];
    let mut destinations = HashMap::new();
    let mut domains = HashMap::new();
    for chain in [ChainKind::Nervos, ChainKind::Ethereum, ChainKind::Bitcoin] {
        destinations.insert(chain, chains.client(chain));
        domains.insert(chain, DomainSeparator::compute(&domain_config(chain)));
    }
    SignerService::new(test_key(index), store, verifiers, destinations, domains, ckb_scripts())
}

/// A complete verifier configuration, as a file would hold it.
pub fn build_test_config() -> Config {
    let placeholder = |byte: &str| ScriptShape {
        code_hash: format!("0x{}", byte.repeat(32)),
        hash_type: "type".to_string(),
        args: "0x".to_string(),
    };
    Config {
        verifier: VerifierConfig {
            private_key_env: "TEST_VERIFIER_PRIVATE_KEY".to_string(),
            address: None,
            store_path: "data/test-verifier.db".to_string(),
        },
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 3334,
            cors_origins: vec!["*".to_string()],
        },
        nervos: ChainSection {
            client: CkbClientConfig {
                rpc_url: "http://127.0.0.1:8114".to_string(),
                indexer_url: None,
                bridge_lock_code_hash: format!("0x{}", "01".repeat(32)),
                recipient_type: placeholder("05"),
                multisig_lock: placeholder("02"),
                multisig_state_type: placeholder("03"),
                cell_deps: Vec::new(),
                scripts: ckb_scripts(),
                tx_fee_shannons: 100_000,
                rpc_timeout_ms: 30_000,
            },
            confirmations: CONFIRMATIONS,
            domain: domain_config(ChainKind::Nervos),
        },
        ethereum: Some(ChainSection {
            client: EvmClientConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                bridge_contract: "0x0000000000000000000000000000000000000b0b".to_string(),
                relayer_address: "0x0000000000000000000000000000000000000002".to_string(),
                gas_price_gwei: 20,
                rpc_timeout_ms: 30_000,
            },
            confirmations: CONFIRMATIONS,
            domain: domain_config(ChainKind::Ethereum),
        }),
        bitcoin: Some(ChainSection {
            client: BtcClientConfig {
                rpc_url: "http://127.0.0.1:18443".to_string(),
                rpc_user: "user".to_string(),
                rpc_password: "pass".to_string(),
                multisig_address: "bcrt1qcustody".to_string(),
                rpc_timeout_ms: 10_000,
            },
            confirmations: CONFIRMATIONS,
            domain: domain_config(ChainKind::Bitcoin),
        }),
        fees: fee_table(),
    }
}

// ============================================================================
// PROPOSAL BUILDERS
// ============================================================================

/// Mint proposal for `(ref_id, net amount)` pairs, built as the collector does.
pub fn mint_proposal(source: ChainKind, nonce: u64, transfers: &[(String, u128)]) -> Proposal {
    let asset = if source == ChainKind::Bitcoin { "btc" } else { ETH_TOKEN };
    let records: Vec<TransferRecord> = transfers
        .iter()
        .map(|(ref_id, amount)| TransferRecord {
            asset: asset.to_string(),
            recipient: CKB_RECIPIENT.to_string(),
            amount: *amount,
            ref_id: ref_id.clone(),
        })
        .collect();
    let records = bridge_protocol::canonicalize(records).unwrap();
    let raw = build_mint_transaction(source, &records, nonce, &ckb_scripts());
    Proposal::build(
        TransferKind::Mint,
        source,
        ChainKind::Nervos,
        nonce,
        records,
        &DomainSeparator::compute(&domain_config(ChainKind::Nervos)),
        Some(serde_json::to_value(raw).unwrap()),
    )
    .unwrap()
}

pub fn unlock_proposal(destination: ChainKind, nonce: u64, transfers: &[(String, u128)]) -> Proposal {
    let (asset, recipient) = match destination {
        ChainKind::Bitcoin => ("btc", BTC_RECIPIENT),
        _ => (ETH_TOKEN, ETH_RECIPIENT),
    };
    let records = transfers
        .iter()
        .map(|(ref_id, amount)| TransferRecord {
            asset: asset.to_string(),
            recipient: recipient.to_string(),
            amount: *amount,
            ref_id: ref_id.clone(),
        })
        .collect();
    Proposal::build(
        TransferKind::Unlock,
        ChainKind::Nervos,
        destination,
        nonce,
        records,
        &DomainSeparator::compute(&domain_config(destination)),
        None,
    )
    .unwrap()
}
