//! Shared test helpers for collector tests
//!
//! - **Chains**: in-memory home ledger, Ethereum and Bitcoin
//! - **Verifiers**: real verifier signers called in-process, plus peers that
//!   refuse or never answer
//! - **Collector**: a `MultisigCoordinator` with short timeouts

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use bridge_protocol::ckb_shape::CkbScriptConfig;
use bridge_protocol::{
    decode_signature_hex, AssetPolicy, DomainConfig, DomainSeparator, FeeTable, Proposal,
    SigErrorCode, SignError,
};
use chain_clients_common::memory::MemoryChain;
use chain_clients_common::{ChainClient, ChainKind, EventKind};
use coordinator::config::{MultisigConfig, WatcherConfig};
use coordinator::ledger::LockRecord;
use coordinator::multisig::PeerError;
use coordinator::watcher::{build_watcher, PollProgress};
use coordinator::{Ledger, MultisigCoordinator, SignatureSource};
use trusted_verifier::verifiers::{BtcLockVerifier, CkbBurnVerifier, EvmLockVerifier};
use trusted_verifier::{CryptoService, SignedStore, SignerService, TransferVerifier};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const ETH_TOKEN: &str = "0x00000000000000000000000000000000000000aa";
pub const ETH_SENDER: &str = "0x0000000000000000000000000000000000000005";
pub const CKB_RECIPIENT: &str = "0x00000000000000000000000000000000000000cc";
pub const ETH_RECIPIENT: &str = "0x00000000000000000000000000000000000000ee";
pub const BTC_RECIPIENT: &str = "bcrt1qrecipient0000000000000000000000000000";

/// Depth of every chain in these tests.
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

/// Mines an Ethereum lock in tx `seed` and buries it. Returns the lock id.
pub fn lock_on_ethereum(chains: &TestChains, seed: u64, amount: u128) -> String {
    let tx = format!("0x{:064x}", seed);
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

/// Mines a home-ledger burn paying out on `destination`. Returns the burn hash.
pub fn burn_on_nervos(chains: &TestChains, seed: u64, destination: ChainKind, amount: u128) -> String {
    let tx = format!("0x{:064x}", seed);
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

/// A lock row as a watcher would build it, for ledger-only tests.
pub fn sample_lock(seed: u64, amount: u128) -> LockRecord {
    let tx_id = format!("0x{:064x}", seed);
    LockRecord {
        id: format!("{}#0", tx_id),
        chain: ChainKind::Ethereum,
        tx_id,
        event_index: 0,
        block_height: seed,
        block_timestamp: 1_600_000_000 + seed as i64,
        asset: ETH_TOKEN.to_string(),
        amount,
        sender: ETH_SENDER.to_string(),
        recipient: CKB_RECIPIENT.to_string(),
        extra_data: String::new(),
    }
}

/// Runs one watcher poll over `chain` into `ledger`.
pub async fn poll(chains: &TestChains, chain: ChainKind, ledger: &Arc<Ledger>) -> PollProgress {
    build_watcher(
        chains.client(chain),
        ledger.clone(),
        fee_table(),
        CONFIRMATIONS,
        0,
        &WatcherConfig::default(),
    )
    .poll_once()
    .await
    .unwrap()
}

// ============================================================================
// SHARED CONFIGURATION
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

fn domains() -> HashMap<ChainKind, DomainSeparator> {
    [ChainKind::Nervos, ChainKind::Ethereum, ChainKind::Bitcoin]
        .into_iter()
        .map(|chain| (chain, DomainSeparator::compute(&domain_config(chain))))
        .collect()
}

pub fn ckb_scripts() -> CkbScriptConfig {
    CkbScriptConfig {
        recipient_lock_code_hash: format!("0x{}", "9b".repeat(32)),
        sudt_code_hash: format!("0x{}", "04".repeat(32)),
        sudt_cell_capacity: 142_0000_0000,
    }
}

/// Short timeouts; partial batches are proposed right away.
pub fn multisig_config(threshold: usize) -> MultisigConfig {
    MultisigConfig {
        threshold,
        verifiers: Vec::new(),
        batch_size: 10,
        max_wait_ms: 0,
        round_timeout_ms: 5_000,
        request_timeout_ms: 2_000,
        max_attempts: 1,
        retry_delay_ms: 10,
        max_submit_attempts: 2,
        confirm_timeout_ms: 200,
        stale_pending_ms: 3_600_000,
        cycle_interval_ms: 10,
    }
}

// ============================================================================
// VERIFIER PEERS
// ============================================================================

/// A verifier node called without HTTP.
pub struct InProcessVerifier {
    name: String,
    address: String,
    signer: SignerService,
}

#[async_trait]
impl SignatureSource for InProcessVerifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.address
    }

    async fn request_signature(
        &self,
        method: &str,
        proposal: &Proposal,
    ) -> Result<Vec<u8>, PeerError> {
        let response = self
            .signer
            .sign(method, proposal)
            .await
            .map_err(PeerError::Refused)?;
        decode_signature_hex(&response.signature).map_err(|e| PeerError::Transport(e.to_string()))
    }
}

fn verifier_signer(index: u8, chains: &TestChains) -> SignerService {
    let fees = fee_table();
    let verifiers: Vec<Arc<dyn TransferVerifier>> = vec![
        Arc::new(CkbBurnVerifier::new(chains.client(ChainKind::Nervos), CONFIRMATIONS, fees.clone())),
        Arc::new(EvmLockVerifier::new(chains.client(ChainKind::Ethereum), CONFIRMATIONS, fees.clone())),
        Arc::new(BtcLockVerifier::new(chains.client(ChainKind::Bitcoin), CONFIRMATIONS, fees)),
    ];
    let destinations = [ChainKind::Nervos, ChainKind::Ethereum, ChainKind::Bitcoin]
        .into_iter()
        .map(|chain| (chain, chains.client(chain)))
        .collect();
    SignerService::new(
        CryptoService::from_key_bytes(&[index + 1; 32]).unwrap(),
        Arc::new(SignedStore::open_in_memory().unwrap()),
        verifiers,
        destinations,
        domains(),
        ckb_scripts(),
    )
}

/// `count` honest verifiers watching `chains`, each with its own key and
/// signed table.
pub fn in_process_verifiers(count: u8, chains: &TestChains) -> Vec<Arc<dyn SignatureSource>> {
    (0..count)
        .map(|i| {
            let signer = verifier_signer(i, chains);
            Arc::new(InProcessVerifier {
                name: format!("verifier-{}", i + 1),
                address: signer.address().to_string(),
                signer,
            }) as Arc<dyn SignatureSource>
        })
        .collect()
}

/// Answers every request with an invalid-record refusal.
pub struct RefusingPeer {
    pub name: String,
    pub address: String,
}

impl RefusingPeer {
    pub fn new(index: u8) -> Arc<dyn SignatureSource> {
        Arc::new(Self {
            name: format!("refusing-{}", index),
            address: format!("0x{:040x}", 0xdead_0000u64 + index as u64),
        })
    }
}

#[async_trait]
impl SignatureSource for RefusingPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.address
    }

    async fn request_signature(&self, _method: &str, _proposal: &Proposal) -> Result<Vec<u8>, PeerError> {
        Err(PeerError::Refused(SignError::invalid_record("records do not match")))
    }
}

/// Refuses every request with `code`, naming the first record of the
/// proposal.
pub struct RecordRefusingPeer {
    pub name: String,
    pub address: String,
    pub code: SigErrorCode,
}

impl RecordRefusingPeer {
    pub fn new(index: u8, code: SigErrorCode) -> Arc<dyn SignatureSource> {
        Arc::new(Self {
            name: format!("record-refusing-{}", index),
            address: format!("0x{:040x}", 0xface_0000u64 + index as u64),
            code,
        })
    }
}

#[async_trait]
impl SignatureSource for RecordRefusingPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> &str {
        &self.address
    }

    async fn request_signature(&self, _method: &str, proposal: &Proposal) -> Result<Vec<u8>, PeerError> {
        let refusal = SignError::new(self.code, "signed at an earlier nonce");
        Err(PeerError::Refused(match proposal.records.first() {
            Some(record) => refusal.for_record(&record.ref_id),
            None => refusal,
        }))
    }
}

/// Never reachable.
pub struct UnreachablePeer {
    pub address: String,
}

impl UnreachablePeer {
    pub fn new(index: u8) -> Arc<dyn SignatureSource> {
        Arc::new(Self {
            address: format!("0x{:040x}", 0xbeef_0000u64 + index as u64),
        })
    }
}

#[async_trait]
impl SignatureSource for UnreachablePeer {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn identity(&self) -> &str {
        &self.address
    }

    async fn request_signature(&self, _method: &str, _proposal: &Proposal) -> Result<Vec<u8>, PeerError> {
        Err(PeerError::Transport("connection refused".to_string()))
    }
}

// ============================================================================
// COLLECTOR
// ============================================================================

pub fn build_coordinator(
    ledger: Arc<Ledger>,
    chains: &TestChains,
    peers: Vec<Arc<dyn SignatureSource>>,
    config: MultisigConfig,
) -> MultisigCoordinator {
    let clients = [ChainKind::Nervos, ChainKind::Ethereum, ChainKind::Bitcoin]
        .into_iter()
        .map(|chain| (chain, chains.client(chain)))
        .collect();
    let depths = [ChainKind::Nervos, ChainKind::Ethereum, ChainKind::Bitcoin]
        .into_iter()
        .map(|chain| (chain, CONFIRMATIONS))
        .collect();
    MultisigCoordinator::new(
        ledger,
        clients,
        peers,
        domains(),
        depths,
        ckb_scripts(),
        config,
    )
}
