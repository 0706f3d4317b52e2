//! Cryptographic Operations Module
//!
//! Holds the verifier's secp256k1 key and signs 32-byte payload digests.
//! The key is loaded once from the environment and never leaves this module:
//! callers get signatures and the signer address, not key material.

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use k256::ecdsa::{SigningKey, VerifyingKey};
use tracing::info;

use bridge_protocol::address_of;

use crate::config::Config;

// ============================================================================
// CRYPTOGRAPHIC SERVICE IMPLEMENTATION
// ============================================================================

/// Signing service of one verifier node.
pub struct CryptoService {
    signing_key: SigningKey,
    address: String,
}

impl std::fmt::Debug for CryptoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoService")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl CryptoService {
    /// Loads the base64 private key from the environment variable named in
    /// the config and, when `verifier.address` is set, checks that the key
    /// belongs to it.
    pub fn new(config: &Config) -> Result<Self> {
        let private_key_b64 = config.verifier.get_private_key()?;
        let private_key_bytes = general_purpose::STANDARD.decode(private_key_b64.trim())?;
        let service = Self::from_key_bytes(&private_key_bytes)?;

        if let Some(expected) = &config.verifier.address {
            if !expected.eq_ignore_ascii_case(&service.address) {
                return Err(anyhow::anyhow!(
                    "Address mismatch: config has {}, but the private key in '{}' corresponds to {}",
                    expected,
                    config.verifier.private_key_env,
                    service.address
                ));
            }
        }

        info!("Crypto service initialized for signer {}", service.address);
        Ok(service)
    }

    /// Builds the service from a raw 32-byte secret.
    pub fn from_key_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(anyhow::anyhow!(
                "Invalid private key length: expected 32 bytes, got {}",
                bytes.len()
            ));
        }
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;
        let address = address_of(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Signer address, `0x` + 40 lowercase hex digits.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Private key as base64, for the key generation binary only.
    pub fn export_private_key(&self) -> String {
        general_purpose::STANDARD.encode(self.signing_key.to_bytes())
    }

    /// Signs `digest` as-is (no message prefix).
    ///
    /// # Returns
    ///
    /// * `Ok(sig)` - 65 bytes `r || s || v`, low-s, `v` = 27 + recovery id
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65]> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| anyhow::anyhow!("Failed to sign digest: {}", e))?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(out)
    }
}
