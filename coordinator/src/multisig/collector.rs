//! Concurrent signature collection for one proposal.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use bridge_protocol::{recover_signer, Proposal, SigErrorCode, SignError};

use super::peers::{PeerError, SignatureSource};
use crate::config::MultisigConfig;

/// Per-round timing.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per verifier.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Bound on a single request.
    pub request_timeout: Duration,
    /// Bound on the whole round.
    pub round_timeout: Duration,
}

impl From<&MultisigConfig> for RetryPolicy {
    fn from(config: &MultisigConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            round_timeout: Duration::from_millis(config.round_timeout_ms),
        }
    }
}

/// Outcome of one collection round.
#[derive(Debug, Default)]
pub struct Collection {
    /// `(signer address, signature)`, one per distinct signer.
    pub signatures: Vec<(String, Vec<u8>)>,
    /// `(peer name, reason)` for every peer that did not contribute.
    pub refusals: Vec<(String, String)>,
    /// Final refusals that named a record: ref_id to `(peer, refusal)`.
    pub record_refusals: BTreeMap<String, Vec<(String, SignError)>>,
    pub timed_out: bool,
}

/// A record no quorum will sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedRecord {
    pub ref_id: String,
    /// Verifiers already signed it into another batch, as opposed to finding
    /// it invalid.
    pub signed_elsewhere: bool,
    pub reason: String,
}

impl Collection {
    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn reached(&self, threshold: usize) -> bool {
        self.signatures.len() >= threshold
    }

    /// Records refused by so many of the `members` verifiers that no
    /// `threshold` quorum can include them.
    pub fn blocked_records(&self, members: usize, threshold: usize) -> Vec<BlockedRecord> {
        let blocking = members.saturating_sub(threshold) + 1;
        self.record_refusals
            .iter()
            .filter(|(_, refusals)| refusals.len() >= blocking)
            .filter_map(|(ref_id, refusals)| {
                let earlier = refusals.iter().find(|(_, r)| is_signed_elsewhere(r.code));
                let (_, refusal) = earlier.or_else(|| refusals.first())?;
                Some(BlockedRecord {
                    ref_id: ref_id.clone(),
                    signed_elsewhere: earlier.is_some(),
                    reason: refusal.message.clone(),
                })
            })
            .collect()
    }
}

fn is_signed_elsewhere(code: SigErrorCode) -> bool {
    matches!(code, SigErrorCode::TxCompleted | SigErrorCode::DuplicateSign)
}

/// Final verdicts about one record rather than the whole proposal.
fn is_record_verdict(code: SigErrorCode) -> bool {
    code == SigErrorCode::InvalidRecord || is_signed_elsewhere(code)
}

async fn ask_peer(
    peer: Arc<dyn SignatureSource>,
    method: &str,
    proposal: &Proposal,
    policy: RetryPolicy,
) -> (Arc<dyn SignatureSource>, Result<Vec<u8>, PeerError>) {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(
            policy.request_timeout,
            peer.request_signature(method, proposal),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PeerError::Transport(format!(
                "no answer within {:?}",
                policy.request_timeout
            ))),
        };

        match result {
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                debug!(
                    "Verifier {} attempt {}/{} failed: {}",
                    peer.name(),
                    attempt,
                    policy.max_attempts,
                    err
                );
                attempt += 1;
                tokio::time::sleep(policy.retry_delay).await;
            }
            other => return (peer, other),
        }
    }
}

/// Asks every peer for a signature over `proposal` concurrently.
///
/// Each signature is recovered against `digest` and must come from the
/// peer's configured identity. Returns as soon as `threshold` distinct
/// signers are in, once every peer has settled, or when the round times out.
pub async fn collect_signatures(
    proposal: &Proposal,
    digest: &[u8; 32],
    peers: &[Arc<dyn SignatureSource>],
    threshold: usize,
    policy: RetryPolicy,
) -> Collection {
    let mut collection = Collection::default();
    let Some(method) = proposal.sign_method() else {
        collection.refusals.push((
            "collector".to_string(),
            format!("no verifier method signs {} to {}", proposal.kind, proposal.chain),
        ));
        return collection;
    };

    let members: HashSet<String> = peers
        .iter()
        .map(|p| p.identity().to_ascii_lowercase())
        .collect();
    let mut signers: HashSet<String> = HashSet::new();

    let mut in_flight: FuturesUnordered<_> = peers
        .iter()
        .map(|peer| ask_peer(peer.clone(), method, proposal, policy))
        .collect();

    let deadline = tokio::time::sleep(policy.round_timeout);
    tokio::pin!(deadline);

    while collection.signatures.len() < threshold {
        tokio::select! {
            _ = &mut deadline => {
                warn!(
                    "Signature round for nonce {} timed out with {}/{} signatures",
                    proposal.nonce,
                    collection.signatures.len(),
                    threshold
                );
                collection.timed_out = true;
                break;
            }
            next = in_flight.next() => {
                let Some((peer, result)) = next else { break };
                let signature = match result {
                    Ok(signature) => signature,
                    Err(err) => {
                        warn!("Verifier {} did not sign: {}", peer.name(), err);
                        if let PeerError::Refused(refusal) = &err {
                            if let Some(ref_id) =
                                refusal.ref_id.as_ref().filter(|_| is_record_verdict(refusal.code))
                            {
                                collection
                                    .record_refusals
                                    .entry(ref_id.to_ascii_lowercase())
                                    .or_default()
                                    .push((peer.name().to_string(), refusal.clone()));
                            }
                        }
                        collection.refusals.push((peer.name().to_string(), err.to_string()));
                        continue;
                    }
                };

                let signer = match recover_signer(digest, &signature) {
                    Ok(signer) => signer,
                    Err(err) => {
                        warn!("Verifier {} returned an unusable signature: {}", peer.name(), err);
                        collection.refusals.push((peer.name().to_string(), err.to_string()));
                        continue;
                    }
                };
                if !signer.eq_ignore_ascii_case(peer.identity()) || !members.contains(&signer) {
                    warn!(
                        "Verifier {} signature recovers to {}, expected {}",
                        peer.name(),
                        signer,
                        peer.identity()
                    );
                    collection.refusals.push((
                        peer.name().to_string(),
                        format!("signature recovers to {}", signer),
                    ));
                    continue;
                }
                if !signers.insert(signer.clone()) {
                    continue;
                }
                debug!("Verifier {} signed nonce {}", peer.name(), proposal.nonce);
                collection.signatures.push((signer, signature));
            }
        }
    }

    info!(
        "Collected {}/{} signatures for {} to {} at nonce {}",
        collection.signatures.len(),
        threshold,
        proposal.kind,
        proposal.chain,
        proposal.nonce
    );
    collection
}
