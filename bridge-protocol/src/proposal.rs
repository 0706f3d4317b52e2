//! Proposals exchanged between the collector and verifiers.

use serde::{Deserialize, Serialize};

use chain_clients_common::{ChainKind, TransferKind, TransferRecord};

use crate::errors::SignError;
use crate::payload::{signing_digest, DomainSeparator};

/// Verifier method for mints to the home ledger.
pub const SIGN_CKB_TX: &str = "signCkbTx";
/// Verifier method for unlocks paid out on Ethereum.
pub const SIGN_ETH_TX: &str = "signEthTx";
/// Verifier method for unlocks paid out on Bitcoin.
pub const SIGN_BTC_TX: &str = "signBtcTx";

/// What the collector asks verifiers to sign.
///
/// The records are context for independent re-derivation; `payload_hash` is
/// the digest the collector claims they produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub kind: TransferKind,
    pub source_chain: ChainKind,
    /// Destination chain the signed batch is submitted to.
    pub chain: ChainKind,
    pub nonce: u64,
    pub records: Vec<TransferRecord>,
    pub payload_hash: String,
    #[serde(default)]
    pub raw_transaction: Option<serde_json::Value>,
}

/// Successful verifier reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// 65-byte `r || s || v` signature, 0x-prefixed hex.
    pub signature: String,
}

/// Sorts records ascending by `ref_id` and rejects duplicate references.
pub fn canonicalize(mut records: Vec<TransferRecord>) -> Result<Vec<TransferRecord>, SignError> {
    records.sort_by(|a, b| a.ref_id.cmp(&b.ref_id));
    if records.windows(2).any(|w| w[0].ref_id == w[1].ref_id) {
        return Err(SignError::invalid_params("duplicate record reference"));
    }
    Ok(records)
}

fn is_canonical(records: &[TransferRecord]) -> bool {
    records.windows(2).all(|w| w[0].ref_id < w[1].ref_id)
}

impl Proposal {
    /// Builds a proposal over `records` in canonical order.
    pub fn build(
        kind: TransferKind,
        source_chain: ChainKind,
        chain: ChainKind,
        nonce: u64,
        records: Vec<TransferRecord>,
        domain: &DomainSeparator,
        raw_transaction: Option<serde_json::Value>,
    ) -> Result<Self, SignError> {
        if records.is_empty() {
            return Err(SignError::invalid_params("proposal has no records"));
        }
        let records = canonicalize(records)?;
        let digest = signing_digest(kind, source_chain, domain, &records, nonce);
        Ok(Self {
            kind,
            source_chain,
            chain,
            nonce,
            records,
            payload_hash: format!("0x{}", hex::encode(digest)),
            raw_transaction,
        })
    }

    /// The claimed digest as bytes.
    pub fn claimed_digest(&self) -> Result<[u8; 32], SignError> {
        let raw = self.payload_hash.strip_prefix("0x").unwrap_or(&self.payload_hash);
        let bytes = hex::decode(raw)
            .map_err(|e| SignError::invalid_params(format!("payload hash is not hex: {}", e)))?;
        bytes
            .try_into()
            .map_err(|_| SignError::invalid_params("payload hash must be 32 bytes"))
    }

    /// Verifier RPC method that signs this proposal, if any route does.
    pub fn sign_method(&self) -> Option<&'static str> {
        match (self.kind, self.chain) {
            (TransferKind::Mint, ChainKind::Nervos) => Some(SIGN_CKB_TX),
            (TransferKind::Unlock, ChainKind::Ethereum) => Some(SIGN_ETH_TX),
            (TransferKind::Unlock, ChainKind::Bitcoin) => Some(SIGN_BTC_TX),
            _ => None,
        }
    }

    pub fn ref_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.ref_id.clone()).collect()
    }
}

/// Checks a proposal against records the verifier derived on its own.
///
/// In order: the proposal's records are canonical, each matches the derived
/// record for the same reference field by field, and the digest recomputed
/// from the derived records equals the claimed `payload_hash`. Returns the
/// digest to sign.
pub fn verify_proposal(
    expected: &[TransferRecord],
    domain: &DomainSeparator,
    proposal: &Proposal,
) -> Result<[u8; 32], SignError> {
    if proposal.records.is_empty() {
        return Err(SignError::invalid_params("proposal has no records"));
    }
    if !is_canonical(&proposal.records) {
        return Err(SignError::invalid_params(
            "records are not in ascending reference order",
        ));
    }
    let expected = canonicalize(expected.to_vec())?;
    if expected.len() != proposal.records.len() {
        return Err(SignError::invalid_record(format!(
            "expected {} records, proposal has {}",
            expected.len(),
            proposal.records.len()
        )));
    }

    for (want, got) in expected.iter().zip(proposal.records.iter()) {
        compare_record(want, got).map_err(|err| err.for_record(&got.ref_id))?;
    }

    let digest = signing_digest(
        proposal.kind,
        proposal.source_chain,
        domain,
        &expected,
        proposal.nonce,
    );
    if digest != proposal.claimed_digest()? {
        return Err(SignError::invalid_params(format!(
            "payload hash mismatch: recomputed 0x{}, claimed {}",
            hex::encode(digest),
            proposal.payload_hash
        )));
    }
    Ok(digest)
}

fn compare_record(want: &TransferRecord, got: &TransferRecord) -> Result<(), SignError> {
    if want.ref_id != got.ref_id {
        return Err(SignError::invalid_record(format!(
            "unexpected reference {}",
            got.ref_id
        )));
    }
    if want.asset != got.asset {
        return Err(SignError::invalid_record(format!(
            "asset mismatch for {}: expected {}, got {}",
            got.ref_id, want.asset, got.asset
        )));
    }
    if want.recipient != got.recipient {
        return Err(SignError::invalid_record(format!(
            "recipient mismatch for {}: expected {}, got {}",
            got.ref_id, want.recipient, got.recipient
        )));
    }
    if want.amount != got.amount {
        return Err(SignError::invalid_record(format!(
            "amount mismatch for {}: expected {}, got {}",
            got.ref_id, want.amount, got.amount
        )));
    }
    Ok(())
}
