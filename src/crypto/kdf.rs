//! Key derivation from the DH shared secret (spec §4.2):
//! `aes_key = SHA-256(shared_secret)`,
//! `hmac_key = SHA-256(shared_secret ‖ 0x01)`.
use sha2::{Digest, Sha256};

pub fn derive_aes_key(shared_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.finalize().into()
}

pub fn derive_hmac_key(shared_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update([0x01]);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_and_hmac_keys_differ() {
        let secret = b"shared secret bytes";
        assert_ne!(derive_aes_key(secret), derive_hmac_key(secret));
    }

    #[test]
    fn derivation_is_deterministic() {
        let secret = b"shared secret bytes";
        assert_eq!(derive_aes_key(secret), derive_aes_key(secret));
        assert_eq!(derive_hmac_key(secret), derive_hmac_key(secret));
    }
}
