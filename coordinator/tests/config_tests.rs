//! Collector configuration tests
//!
//! Parse the shipped template and check that validation rejects every
//! verifier-set and chain setting the collector must not run with.

use bridge_protocol::AssetPolicy;
use chain_clients_common::ChainKind;
use coordinator::config::VerifierPeerConfig;
use coordinator::Config;

const TEMPLATE: &str = include_str!("../config/coordinator.template.toml");

fn template() -> Config {
    toml::from_str(TEMPLATE).unwrap()
}

fn assert_invalid(config: &Config, needle: &str) {
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains(needle), "expected '{}' in '{}'", needle, err);
}

/// Test that the shipped template loads and validates
/// What is tested: load_from on config/coordinator.template.toml
/// Why: Operators start from this file
#[test]
fn test_template_loads() {
    let config = Config::load_from("config/coordinator.template.toml").unwrap();
    assert_eq!(config.api.port, 3030);
    assert_eq!(config.multisig.threshold, 2);
    assert_eq!(config.multisig.verifiers.len(), 3);
    assert_eq!(
        config.foreign_chains(),
        vec![ChainKind::Ethereum, ChainKind::Bitcoin]
    );
    assert_eq!(config.confirmations(ChainKind::Bitcoin), Some(6));
    assert_eq!(config.domain(ChainKind::Ethereum).unwrap().chain_id, 31337);
    assert_eq!(config.admin.key_env, "BRIDGE_ADMIN_KEY");

    let btc = config.fees.policy(ChainKind::Bitcoin, "BTC").unwrap();
    assert_eq!(btc.minimum, 10_000);
    assert_eq!(btc.fee, 1_000);
}

/// Test that a missing file points at the template
#[test]
fn test_missing_file_is_reported() {
    let err = Config::load_from("config/does-not-exist.toml")
        .unwrap_err()
        .to_string();
    assert!(err.contains("coordinator.template.toml"));
}

/// Test that the threshold must fit the verifier set
/// What is tested: threshold 0 and threshold above the number of verifiers
/// Why: Either makes every batch either unsigned or unsignable
#[test]
fn test_threshold_bounds() {
    let mut config = template();
    config.multisig.threshold = 4;
    assert_invalid(&config, "threshold 4");

    config.multisig.threshold = 0;
    assert_invalid(&config, "threshold 0");

    config.multisig.verifiers.clear();
    config.multisig.threshold = 1;
    assert_invalid(&config, "no verifiers");
}

/// Test that one verifier cannot be counted twice
/// What is tested: duplicate addresses (case-insensitive) and duplicate URLs
/// Why: A repeated identity would let one key satisfy two quorum slots
#[test]
fn test_duplicate_verifiers_are_rejected() {
    let mut config = template();
    let first = config.multisig.verifiers[0].clone();
    config.multisig.verifiers.push(VerifierPeerConfig {
        name: "copy".to_string(),
        url: "http://127.0.0.1:4000".to_string(),
        address: first.address.to_uppercase().replacen("0X", "0x", 1),
    });
    assert_invalid(&config, "appears more than once");

    let mut config = template();
    config.multisig.verifiers.push(VerifierPeerConfig {
        name: "same-url".to_string(),
        url: format!("{}/", first.url),
        address: "0x0000000000000000000000000000000000000099".to_string(),
    });
    assert_invalid(&config, "URL");
}

/// Test that zero confirmations and empty batches are rejected
#[test]
fn test_zero_values_are_rejected() {
    let mut config = template();
    config.ethereum.as_mut().unwrap().confirmations = 0;
    assert_invalid(&config, "confirmations");

    let mut config = template();
    config.multisig.batch_size = 0;
    assert_invalid(&config, "batch_size");
}

/// Test that at least one foreign chain is configured
#[test]
fn test_foreign_chain_required() {
    let mut config = template();
    config.ethereum = None;
    config.bitcoin = None;
    config.fees.assets.clear();
    assert_invalid(&config, "at least one");
}

/// Test that fee entries must name a configured foreign chain
/// What is tested: an entry for an unconfigured chain and one for the home ledger
/// Why: Such entries could never apply and hide a configuration mistake
#[test]
fn test_fee_entry_for_unconfigured_chain() {
    let mut config = template();
    config.bitcoin = None;
    assert_invalid(&config, "not configured");

    let mut config = template();
    config.fees.assets.push(AssetPolicy {
        chain: ChainKind::Nervos,
        asset: "0x01".to_string(),
        minimum: 1,
        fee: 0,
    });
    assert_invalid(&config, "not configured");
}
