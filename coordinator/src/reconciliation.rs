//! Reconciliation checker
//!
//! Periodically compares what entered the bridge with what left it, per
//! foreign chain and asset. Imbalances are reported, never corrected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use chain_clients_common::ChainKind;

use crate::ledger::{FlowTotals, Ledger, LedgerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowDirection {
    /// Foreign lock to home mint.
    Inbound,
    /// Home burn to foreign unlock.
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCheck {
    pub chain: ChainKind,
    pub asset: String,
    pub direction: FlowDirection,
    pub totals: FlowTotals,
    /// Completed source amounts equal delivered amounts plus fees.
    pub balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub flows: Vec<FlowCheck>,
}

impl ReconciliationReport {
    pub fn imbalances(&self) -> impl Iterator<Item = &FlowCheck> {
        self.flows.iter().filter(|f| !f.balanced)
    }

    pub fn is_balanced(&self) -> bool {
        self.imbalances().next().is_none()
    }
}

fn balanced(totals: &FlowTotals) -> bool {
    totals
        .delivered
        .checked_add(totals.fees)
        .map_or(false, |out| out == totals.source_settled)
}

pub struct ReconciliationChecker {
    ledger: Arc<Ledger>,
}

impl ReconciliationChecker {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Builds a report over every tracked (chain, asset) pair and logs each
    /// imbalance.
    pub fn check(&self) -> Result<ReconciliationReport, LedgerError> {
        let mut flows = Vec::new();
        for (chain, asset) in self.ledger.tracked_assets()? {
            for direction in [FlowDirection::Inbound, FlowDirection::Outbound] {
                let totals = match direction {
                    FlowDirection::Inbound => self.ledger.inbound_totals(chain, &asset)?,
                    FlowDirection::Outbound => self.ledger.outbound_totals(chain, &asset)?,
                };
                if totals == FlowTotals::default() {
                    continue;
                }
                let check = FlowCheck {
                    chain,
                    asset: asset.clone(),
                    direction,
                    balanced: balanced(&totals),
                    totals,
                };
                if !check.balanced {
                    warn!(
                        "Reconciliation imbalance on {} {} ({:?}): settled {} != delivered {} + fees {}",
                        chain,
                        asset,
                        direction,
                        totals.source_settled,
                        totals.delivered,
                        totals.fees
                    );
                }
                flows.push(check);
            }
        }

        Ok(ReconciliationReport {
            generated_at: Utc::now(),
            flows,
        })
    }

    pub async fn run(self: Arc<Self>, interval: Duration) {
        info!("Starting reconciliation every {:?}", interval);
        loop {
            tokio::time::sleep(interval).await;
            match self.check() {
                Ok(report) if report.is_balanced() => {
                    info!("Reconciliation balanced over {} flows", report.flows.len())
                }
                Ok(_) => {}
                Err(e) => error!("Reconciliation failed: {}", e),
            }
        }
    }
}
