//! Signing decision of a verifier node.
//!
//! [`SignerService::sign`] is the only path to the private key. It signs a
//! proposal only after re-deriving every record from source-chain state,
//! rebuilding the unsigned transaction where one is carried, recomputing the
//! payload hash, checking the replay nonce and consulting the persisted table
//! of earlier signatures.

use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use bridge_protocol::ckb_shape::{build_mint_transaction, CkbScriptConfig, MintTransaction};
use bridge_protocol::{
    canonicalize, verify_proposal, DomainSeparator, Proposal, SigErrorCode, SignError,
    SignResponse,
};
use chain_clients_common::{ChainClient, ChainKind, TransferKind, TransferRecord};

use crate::config::Config;
use crate::crypto::CryptoService;
use crate::storage::{SignedPayload, SignedStore, StoreError};
use crate::verifiers::{
    chain_error, BtcLockVerifier, CanonicalTransfer, CkbBurnVerifier, EvmLockVerifier,
    TransferVerifier,
};

fn store_error(err: StoreError) -> SignError {
    SignError::new(SigErrorCode::Unknown, format!("signed payload store: {}", err))
}

/// Where a destination chain's replay nonce comes from.
enum NonceSource {
    /// The chain tracks it; a batch is only valid at the current value.
    Chain(u64),
    /// The chain keeps none; nonces only ever grow.
    Local,
}

pub struct SignerService {
    crypto: CryptoService,
    store: Arc<SignedStore>,
    /// Keyed by source chain.
    verifiers: HashMap<ChainKind, Arc<dyn TransferVerifier>>,
    /// Keyed by destination chain; read for the replay nonce.
    destinations: HashMap<ChainKind, Arc<dyn ChainClient>>,
    domains: HashMap<ChainKind, DomainSeparator>,
    scripts: CkbScriptConfig,
    /// Serializes the check-sign-persist section.
    signing: Mutex<()>,
}

impl SignerService {
    pub fn new(
        crypto: CryptoService,
        store: Arc<SignedStore>,
        verifiers: Vec<Arc<dyn TransferVerifier>>,
        destinations: HashMap<ChainKind, Arc<dyn ChainClient>>,
        domains: HashMap<ChainKind, DomainSeparator>,
        scripts: CkbScriptConfig,
    ) -> Self {
        let verifiers = verifiers
            .into_iter()
            .map(|v| (v.source_chain(), v))
            .collect();
        Self {
            crypto,
            store,
            verifiers,
            destinations,
            domains,
            scripts,
            signing: Mutex::new(()),
        }
    }

    /// Wires chain clients, verifiers and domains from the configuration.
    pub fn from_config(
        config: &Config,
        crypto: CryptoService,
        store: Arc<SignedStore>,
    ) -> anyhow::Result<Self> {
        let mut destinations: HashMap<ChainKind, Arc<dyn ChainClient>> = HashMap::new();
        let mut domains = HashMap::new();
        let mut verifiers: Vec<Arc<dyn TransferVerifier>> = Vec::new();

        let nervos: Arc<dyn ChainClient> =
            Arc::new(chain_clients_ckb::CkbClient::new(&config.nervos.client)?);
        verifiers.push(Arc::new(CkbBurnVerifier::new(
            nervos.clone(),
            config.nervos.confirmations,
            config.fees.clone(),
        )));
        destinations.insert(ChainKind::Nervos, nervos);
        domains.insert(
            ChainKind::Nervos,
            DomainSeparator::compute(&config.nervos.domain),
        );

        if let Some(ethereum) = &config.ethereum {
            let client: Arc<dyn ChainClient> =
                Arc::new(chain_clients_evm::EvmClient::new(&ethereum.client)?);
            verifiers.push(Arc::new(EvmLockVerifier::new(
                client.clone(),
                ethereum.confirmations,
                config.fees.clone(),
            )));
            destinations.insert(ChainKind::Ethereum, client);
            domains.insert(ChainKind::Ethereum, DomainSeparator::compute(&ethereum.domain));
        }
        if let Some(bitcoin) = &config.bitcoin {
            let client: Arc<dyn ChainClient> =
                Arc::new(chain_clients_btc::BtcClient::new(&bitcoin.client)?);
            verifiers.push(Arc::new(BtcLockVerifier::new(
                client.clone(),
                bitcoin.confirmations,
                config.fees.clone(),
            )));
            destinations.insert(ChainKind::Bitcoin, client);
            domains.insert(ChainKind::Bitcoin, DomainSeparator::compute(&bitcoin.domain));
        }

        Ok(Self::new(
            crypto,
            store,
            verifiers,
            destinations,
            domains,
            config.nervos.client.scripts.clone(),
        ))
    }

    pub fn address(&self) -> &str {
        self.crypto.address()
    }

    /// Validates `proposal` for `method` and returns this node's signature
    /// over its payload hash.
    pub async fn sign(&self, method: &str, proposal: &Proposal) -> Result<SignResponse, SignError> {
        self.check_route(method, proposal)?;

        let verifier = self.verifiers.get(&proposal.source_chain).ok_or_else(|| {
            SignError::invalid_params(format!(
                "this verifier does not watch {}",
                proposal.source_chain
            ))
        })?;
        if verifier.transfer_kind() != proposal.kind {
            return Err(SignError::invalid_params(format!(
                "{} transfers cannot originate on {}",
                proposal.kind, proposal.source_chain
            )));
        }
        let domain = self.domains.get(&proposal.chain).ok_or_else(|| {
            SignError::invalid_params(format!("no signing domain for {}", proposal.chain))
        })?;

        let derived = self.derive_all(verifier, proposal).await?;
        let expected = canonicalize(derived.into_iter().map(|t| t.record).collect())?;

        let digest = verify_proposal(&expected, domain, proposal)?;
        self.check_raw_transaction(proposal, &expected)?;

        let _guard = self.signing.lock().await;

        if let Some(stored) = self.store.find(&proposal.payload_hash).map_err(store_error)? {
            info!(
                "Payload {} was already signed, returning the stored signature",
                proposal.payload_hash
            );
            return Ok(SignResponse {
                signature: stored.signature,
            });
        }

        let nonce_source = self.check_nonce(proposal).await?;
        self.check_prior_signings(proposal, &nonce_source)?;

        let signature = self
            .crypto
            .sign_digest(&digest)
            .map_err(|e| SignError::new(SigErrorCode::Unknown, e.to_string()))?;
        let signature = format!("0x{}", hex::encode(signature));

        self.store
            .insert(&SignedPayload {
                payload_hash: proposal.payload_hash.to_ascii_lowercase(),
                kind: proposal.kind,
                chain: proposal.chain,
                nonce: proposal.nonce,
                ref_ids: proposal.ref_ids(),
                signature: signature.clone(),
                created_at: chrono::Utc::now().timestamp_millis(),
            })
            .map_err(store_error)?;

        info!(
            "Signed {} of {} records to {} at nonce {}: {}",
            proposal.kind,
            proposal.records.len(),
            proposal.chain,
            proposal.nonce,
            proposal.payload_hash
        );
        Ok(SignResponse { signature })
    }

    fn check_route(&self, method: &str, proposal: &Proposal) -> Result<(), SignError> {
        if proposal.sign_method() != Some(method) {
            return Err(SignError::invalid_params(format!(
                "{} cannot sign a {} to {}",
                method, proposal.kind, proposal.chain
            )));
        }
        let home_source = proposal.source_chain == ChainKind::Nervos;
        let consistent = match proposal.kind {
            TransferKind::Mint => !home_source,
            TransferKind::Unlock => home_source,
        };
        if !consistent {
            return Err(SignError::invalid_params(format!(
                "a {} cannot come from {}",
                proposal.kind, proposal.source_chain
            )));
        }
        Ok(())
    }

    async fn derive_all(
        &self,
        verifier: &Arc<dyn TransferVerifier>,
        proposal: &Proposal,
    ) -> Result<Vec<CanonicalTransfer>, SignError> {
        let derived = try_join_all(
            proposal
                .records
                .iter()
                .map(|record| async move {
                    verifier
                        .derive_expected_transfer(&record.ref_id)
                        .await
                        .map_err(|err| err.for_record(&record.ref_id))
                }),
        )
        .await
        .map_err(|err| {
            warn!("Refusing {}: {}", proposal.payload_hash, err);
            err
        })?;

        for transfer in &derived {
            if transfer.destination != proposal.chain {
                return Err(SignError::invalid_record(format!(
                    "{} pays out on {}, not {}",
                    transfer.record.ref_id, transfer.destination, proposal.chain
                ))
                .for_record(&transfer.record.ref_id));
            }
        }
        Ok(derived)
    }

    /// Mints carry the unsigned home-ledger transaction; it must be exactly
    /// the one built from the derived records. Unlocks carry none.
    fn check_raw_transaction(
        &self,
        proposal: &Proposal,
        expected: &[TransferRecord],
    ) -> Result<(), SignError> {
        match (proposal.kind, &proposal.raw_transaction) {
            (TransferKind::Mint, Some(raw)) => {
                let claimed: MintTransaction = serde_json::from_value(raw.clone()).map_err(|e| {
                    SignError::invalid_params(format!("unreadable mint transaction: {}", e))
                })?;
                let rebuilt = build_mint_transaction(
                    proposal.source_chain,
                    expected,
                    proposal.nonce,
                    &self.scripts,
                );
                if claimed != rebuilt {
                    return Err(SignError::invalid_record(
                        "mint transaction does not match the outputs derived from the locks",
                    ));
                }
                Ok(())
            }
            (TransferKind::Mint, None) => Err(SignError::invalid_params(
                "mint proposal carries no transaction",
            )),
            (TransferKind::Unlock, Some(_)) => Err(SignError::invalid_params(
                "unlock proposal must not carry a transaction",
            )),
            (TransferKind::Unlock, None) => Ok(()),
        }
    }

    async fn check_nonce(&self, proposal: &Proposal) -> Result<NonceSource, SignError> {
        let client = self.destinations.get(&proposal.chain).ok_or_else(|| {
            SignError::invalid_params(format!("{} is not configured", proposal.chain))
        })?;
        match client
            .multisig_nonce()
            .await
            .map_err(|e| chain_error(proposal.chain, e))?
        {
            Some(current) if proposal.nonce < current => Err(SignError::invalid_params(format!(
                "stale nonce {}: {} is at {}",
                proposal.nonce, proposal.chain, current
            ))),
            Some(current) if proposal.nonce > current => Err(SignError::new(
                SigErrorCode::BlockSyncUncompleted,
                format!(
                    "nonce {} is ahead of {} nonce {} as seen by this node",
                    proposal.nonce, proposal.chain, current
                ),
            )),
            Some(current) => Ok(NonceSource::Chain(current)),
            None => {
                let highest = self.store.max_nonce(proposal.chain).map_err(store_error)?;
                if let Some(highest) = highest {
                    if proposal.nonce <= highest {
                        return Err(SignError::invalid_params(format!(
                            "nonce {} already used for {} (highest signed {})",
                            proposal.nonce, proposal.chain, highest
                        )));
                    }
                }
                Ok(NonceSource::Local)
            }
        }
    }

    /// A reference may appear in several payloads only when at most one of
    /// them can ever execute: same on-chain nonce slot.
    fn check_prior_signings(
        &self,
        proposal: &Proposal,
        nonce_source: &NonceSource,
    ) -> Result<(), SignError> {
        let hash = proposal.payload_hash.to_ascii_lowercase();
        let prior = self
            .store
            .prior_signings(proposal.chain, &proposal.ref_ids())
            .map_err(store_error)?;

        for earlier in prior.iter().filter(|p| p.payload_hash != hash) {
            match nonce_source {
                NonceSource::Chain(_) if earlier.nonce == proposal.nonce => {}
                NonceSource::Chain(_) if earlier.nonce < proposal.nonce => {
                    return Err(SignError::new(
                        SigErrorCode::TxCompleted,
                        format!(
                            "{} was signed at nonce {}, which {} has since consumed",
                            earlier.ref_id, earlier.nonce, proposal.chain
                        ),
                    )
                    .for_record(&earlier.ref_id));
                }
                _ => {
                    return Err(SignError::new(
                        SigErrorCode::DuplicateSign,
                        format!(
                            "{} was already signed in {} at nonce {}",
                            earlier.ref_id, earlier.payload_hash, earlier.nonce
                        ),
                    )
                    .for_record(&earlier.ref_id));
                }
            }
        }
        Ok(())
    }
}
