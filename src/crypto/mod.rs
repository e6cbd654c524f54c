//! Cryptographic primitives: RSA keypairs and signatures, Diffie-Hellman key
//! agreement, AES-256-GCM record encryption, and key derivation (spec §4.2).
//!
//! None of these primitives are novel: this module is a thin, explicit
//! wrapper over `rsa`, `num-bigint-dig`, `aes-gcm`, and `sha2` so the rest of
//! the crate can talk about "sign", "derive", "seal"/"open" rather than
//! library-specific types.

pub mod cipher;
pub mod dh;
pub mod kdf;
pub mod rsa_keys;

pub use cipher::{seal, open};
pub use dh::{DhGroup, DhKeypair};
pub use kdf::{derive_aes_key, derive_hmac_key};
pub use rsa_keys::RsaKeypair;

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `input` and return it as a lowercase hex
/// string. Used for `users.properties` password hashes (spec §6).
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{:02x}", b).expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        // SHA-256("admin") per spec §8 scenario 1.
        assert_eq!(
            sha256_hex(b"admin"),
            "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918"
        );
    }
}
