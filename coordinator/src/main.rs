//! Bridge Collector Service
//!
//! Wires the ledger, chain clients, watchers, multisig loops, reconciliation
//! and the JSON-RPC API together from one configuration file.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use bridge_protocol::DomainSeparator;
use chain_clients_btc::BtcClient;
use chain_clients_ckb::CkbClient;
use chain_clients_common::{ChainClient, ChainKind};
use chain_clients_evm::EvmClient;

use coordinator::api::{ApiServer, BridgeChains};
use coordinator::multisig::{run_mint_loop, run_unlock_loop, HttpVerifierPeer};
use coordinator::watcher::{build_watcher, run_watcher};
use coordinator::{Config, Ledger, MultisigCoordinator, ReconciliationChecker, SignatureSource};

fn print_help() {
    println!("Bridge Collector Service");
    println!();
    println!("Usage: coordinator [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <path>   Use custom config file path");
    println!("  --help, -h        Show this help message");
    println!();
    println!("Environment variables:");
    println!("  COORDINATOR_CONFIG_PATH    Path to config file (overrides --config)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }
    if let Some(i) = args.iter().position(|arg| arg == "--config") {
        let path = args
            .get(i + 1)
            .context("--config requires a path argument")?;
        if std::env::var("COORDINATOR_CONFIG_PATH").is_err() {
            std::env::set_var("COORDINATOR_CONFIG_PATH", path);
        }
        info!("Using custom config: {}", path);
    }

    info!("Starting Bridge Collector Service");
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let ledger = Arc::new(
        Ledger::open(&config.ledger.path)
            .with_context(|| format!("Failed to open ledger at {}", config.ledger.path))?,
    );

    // Chain clients
    let nervos = Arc::new(CkbClient::new(&config.nervos.client)?);
    let ethereum = match &config.ethereum {
        Some(section) => Some(Arc::new(EvmClient::new(&section.client)?)),
        None => None,
    };
    let bitcoin = match &config.bitcoin {
        Some(section) => Some(Arc::new(BtcClient::new(&section.client)?)),
        None => None,
    };

    let mut clients: HashMap<ChainKind, Arc<dyn ChainClient>> = HashMap::new();
    clients.insert(ChainKind::Nervos, nervos.clone());
    if let Some(client) = &ethereum {
        clients.insert(ChainKind::Ethereum, client.clone());
    }
    if let Some(client) = &bitcoin {
        clients.insert(ChainKind::Bitcoin, client.clone());
    }

    // Watchers: a fatal watcher error stops the process.
    let (fatal_tx, mut fatal_rx) = tokio::sync::mpsc::channel::<String>(4);
    for (chain, client) in &clients {
        let confirmations = config.confirmations(*chain).unwrap_or(1);
        let watcher = build_watcher(
            client.clone(),
            ledger.clone(),
            config.fees.clone(),
            confirmations,
            config.start_height(*chain),
            &config.watcher,
        );
        let watcher_config = config.watcher.clone();
        let fatal_tx = fatal_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = run_watcher(watcher, watcher_config).await {
                let _ = fatal_tx.send(e.to_string()).await;
            }
        });
    }

    // Multisig coordination
    let request_timeout = Duration::from_millis(config.multisig.request_timeout_ms);
    let mut peers: Vec<Arc<dyn SignatureSource>> = Vec::new();
    for peer in &config.multisig.verifiers {
        peers.push(Arc::new(HttpVerifierPeer::new(peer, request_timeout)?));
    }
    let mut domains = HashMap::new();
    let mut depths = HashMap::new();
    for chain in clients.keys() {
        if let Some(domain) = config.domain(*chain) {
            domains.insert(*chain, DomainSeparator::compute(domain));
        }
        if let Some(depth) = config.confirmations(*chain) {
            depths.insert(*chain, depth.max(1));
        }
    }
    let coordinator = Arc::new(MultisigCoordinator::new(
        ledger.clone(),
        clients.clone(),
        peers,
        domains,
        depths,
        config.nervos.client.scripts.clone(),
        config.multisig.clone(),
    ));
    info!(
        "Multisig coordinator ready: {}-of-{} verifiers",
        config.multisig.threshold,
        config.multisig.verifiers.len()
    );

    tokio::spawn(run_mint_loop(coordinator.clone(), config.foreign_chains()));
    for chain in config.foreign_chains() {
        tokio::spawn(run_unlock_loop(coordinator.clone(), chain));
    }

    let reconciliation = Arc::new(ReconciliationChecker::new(ledger.clone()));
    tokio::spawn(
        reconciliation
            .clone()
            .run(Duration::from_millis(config.reconciliation.interval_ms)),
    );

    let chains = BridgeChains {
        nervos,
        ethereum,
        bitcoin,
    };
    let api_server = ApiServer::new(config, ledger, chains, reconciliation);

    tokio::select! {
        result = api_server.run() => result,
        Some(message) = fatal_rx.recv() => {
            error!("Stopping: {}", message);
            Err(anyhow::anyhow!(message))
        }
    }
}
