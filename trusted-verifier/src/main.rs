//! Trusted Verifier Service
//!
//! Loads the configuration, the signing key and the signed payload store,
//! then serves the signer JSON-RPC API until shutdown.
//!
//! ## Security Requirements
//!
//! The private key is read from the environment variable named in the
//! configuration and never written anywhere. The node signs nothing it has
//! not re-derived from its own chain endpoints.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use trusted_verifier::api::ApiServer;
use trusted_verifier::{Config, CryptoService, SignedStore, SignerService};

fn print_help() {
    println!("Usage: trusted-verifier [--config <path>]");
    println!();
    println!("Options:");
    println!("  --config <path>  Configuration file (default: $VERIFIER_CONFIG_PATH or config/verifier.toml)");
    println!("  --help           Print this help");
}

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }
    let config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .context("--config requires a path argument")?;
            Config::load_from(path)?
        }
        None => Config::load()?,
    };
    info!("Starting Trusted Verifier Service");

    let crypto = CryptoService::new(&config)?;
    if let Some(dir) = std::path::Path::new(&config.verifier.store_path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }
    let store = Arc::new(
        SignedStore::open(&config.verifier.store_path)
            .with_context(|| format!("Failed to open {}", config.verifier.store_path))?,
    );
    info!(
        "Signed payload store at {} holds {} signatures",
        config.verifier.store_path,
        store.count()?
    );

    let signer = Arc::new(SignerService::from_config(&config, crypto, store)?);
    info!("Verifier {} ready", signer.address());

    let api_server = ApiServer::new(config.api.clone(), signer);
    api_server.run().await?;

    Ok(())
}
