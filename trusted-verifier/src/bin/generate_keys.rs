//! secp256k1 Key Generation Utility
//!
//! Generates a verifier signing key and prints the address the collector
//! must list for this verifier.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_keys
//! ```
//!
//! Put the private key into the environment variable named by
//! `verifier.private_key_env`, and the address into both
//! `verifier.address` and the collector's `[[multisig.verifiers]]` entry.

use trusted_verifier::CryptoService;

fn main() {
    let crypto = CryptoService::generate();

    println!("Generated secp256k1 Key Pair:");
    println!("Private Key (base64): {}", crypto.export_private_key());
    println!("Signer Address: {}", crypto.address());
    println!();
    println!("Keep the private key out of config files; export it in the configured env var.");
}
