//! Asset whitelist and bridge fee table.
//!
//! The collector applies it when ingesting locks and burns, and every
//! verifier applies the same table when re-deriving records, so a collector
//! with a different fee schedule cannot get its proposals signed.

use serde::{Deserialize, Deserializer, Serialize};

use chain_clients_common::hex_utils::normalize_hex;
use chain_clients_common::ChainKind;

/// Amounts in config files may be TOML integers or decimal strings.
fn lenient_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v as u128),
        Raw::Str(s) => s.parse::<u128>().map_err(serde::de::Error::custom),
    }
}

/// Bridge policy for one asset on one foreign chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPolicy {
    pub chain: ChainKind,
    /// Token address for account chains, `btc` for bitcoin.
    pub asset: String,
    /// Smallest lock or burn amount that is bridged.
    #[serde(deserialize_with = "lenient_amount", default)]
    pub minimum: u128,
    /// Flat fee kept by the bridge, in the asset's base unit.
    #[serde(deserialize_with = "lenient_amount", default)]
    pub fee: u128,
}

/// Result of checking one observed transfer against the policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assessment {
    Accepted { fee: u128, net: u128 },
    Rejected { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTable {
    #[serde(default)]
    pub assets: Vec<AssetPolicy>,
}

fn same_asset(a: &str, b: &str) -> bool {
    if a.starts_with("0x") || b.starts_with("0x") {
        normalize_hex(a) == normalize_hex(b)
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

impl FeeTable {
    pub fn new(assets: Vec<AssetPolicy>) -> Self {
        Self { assets }
    }

    pub fn policy(&self, chain: ChainKind, asset: &str) -> Option<&AssetPolicy> {
        self.assets
            .iter()
            .find(|p| p.chain == chain && same_asset(&p.asset, asset))
    }

    /// Decides whether `amount` of `asset` on `chain` is bridged, and for how much.
    pub fn assess(&self, chain: ChainKind, asset: &str, amount: u128) -> Assessment {
        let policy = match self.policy(chain, asset) {
            Some(policy) => policy,
            None => {
                return Assessment::Rejected {
                    reason: format!("asset {} on {} is not whitelisted", asset, chain),
                }
            }
        };
        if amount < policy.minimum {
            return Assessment::Rejected {
                reason: format!("amount {} is below the minimum {}", amount, policy.minimum),
            };
        }
        if amount <= policy.fee {
            return Assessment::Rejected {
                reason: format!("amount {} does not cover the bridge fee {}", amount, policy.fee),
            };
        }
        Assessment::Accepted {
            fee: policy.fee,
            net: amount - policy.fee,
        }
    }
}
