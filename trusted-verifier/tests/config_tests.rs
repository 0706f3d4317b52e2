//! Configuration loading and validation tests

use bridge_protocol::AssetPolicy;
use chain_clients_common::ChainKind;
use trusted_verifier::Config;

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::build_test_config;

const TEMPLATE: &str = include_str!("../config/verifier.template.toml");

/// Test that the shipped template loads and validates
/// What is tested: write the template to a file and load it
/// Why: operators start from this file; it must stay in sync with the
/// configuration structs
#[test]
fn test_template_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verifier.toml");
    std::fs::write(&path, TEMPLATE).unwrap();

    let loaded = Config::load_from(path.to_str().unwrap()).unwrap();

    assert_eq!(loaded.api.port, 3334);
    assert_eq!(loaded.foreign_chains(), vec![ChainKind::Ethereum, ChainKind::Bitcoin]);
    assert_eq!(loaded.confirmations(ChainKind::Bitcoin), Some(6));
    assert_eq!(loaded.nervos.client.scripts.sudt_cell_capacity, 142_0000_0000);
}

/// Test that fee amounts accept integers and decimal strings
/// What is tested: the template writes Ethereum amounts as integers and
/// Bitcoin amounts as strings
/// Why: base-unit amounts can exceed what TOML integers hold
#[test]
fn test_fee_amounts_parse_both_forms() {
    let config: Config = toml::from_str(TEMPLATE).unwrap();
    let btc = config.fees.policy(ChainKind::Bitcoin, "btc").unwrap();
    assert_eq!((btc.minimum, btc.fee), (10_000, 1_000));
    let eth = config
        .fees
        .policy(ChainKind::Ethereum, "0x00000000000000000000000000000000000000AA")
        .unwrap();
    assert_eq!((eth.minimum, eth.fee), (1_000, 100));
}

/// Test that a missing file is reported with a copy hint
#[test]
fn test_missing_config_file() {
    let err = Config::load_from("/nonexistent/verifier.toml").unwrap_err();
    assert!(err.to_string().contains("not found"));
}

/// Test that zero confirmations are refused
/// What is tested: Ethereum confirmations set to 0
/// Why: signing at depth zero would co-sign transfers a reorg can erase
#[test]
fn test_zero_confirmations_rejected() {
    let mut config = build_test_config();
    if let Some(ethereum) = config.ethereum.as_mut() {
        ethereum.confirmations = 0;
    }
    assert!(config.validate().is_err());
}

/// Test that a verifier without foreign chains is refused
#[test]
fn test_no_foreign_chain_rejected() {
    let mut config = build_test_config();
    config.ethereum = None;
    config.bitcoin = None;
    config.fees.assets.clear();
    assert!(config.validate().is_err());
}

/// Test that fee entries must name a configured foreign chain
/// What is tested: a Bitcoin fee entry with Bitcoin removed, and a home
/// ledger fee entry
/// Why: a fee for a chain the verifier cannot see is a typo, not a policy
#[test]
fn test_fee_entry_for_unconfigured_chain_rejected() {
    let mut config = build_test_config();
    config.bitcoin = None;
    assert!(config.validate().is_err());

    let mut config = build_test_config();
    config.fees.assets.push(AssetPolicy {
        chain: ChainKind::Nervos,
        asset: "ckb".to_string(),
        minimum: 0,
        fee: 0,
    });
    assert!(config.validate().is_err());
}

/// Test that the default configuration is usable for local development
#[test]
fn test_default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.verifier.private_key_env, "VERIFIER_PRIVATE_KEY");
}
