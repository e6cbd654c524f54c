//! AES-256-GCM record sealing with a fresh random 96-bit IV per call
//! (spec §4.1/§4.2), grounded on the teacher crate's `aes_gcm` usage in
//! `api.rs`.
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;

use crate::errors::Result;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Encrypts `plaintext` under `key` with a freshly drawn nonce, returning
/// `IV ‖ ciphertext ‖ tag`. No associated data is used (spec §4.2).
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher.encrypt(&nonce, plaintext)?;
    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `IV ‖ ciphertext ‖ tag` under `key`.
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < IV_LEN + TAG_LEN {
        return Err(crate::errors::Error::ShortRead {
            expected: IV_LEN + TAG_LEN,
            got: sealed.len(),
        });
    }
    let (iv, ciphertext) = sealed.split_at(IV_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    Ok(cipher.decrypt(nonce, ciphertext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [7u8; 32];
        let sealed = seal(&key, b"hello world").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"hello world");
    }

    #[test]
    fn distinct_seals_use_distinct_ivs() {
        let key = [7u8; 32];
        let a = seal(&key, b"same plaintext").unwrap();
        let b = seal(&key, b"same plaintext").unwrap();
        assert_ne!(a[..IV_LEN], b[..IV_LEN]);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let key = [7u8; 32];
        let mut sealed = seal(&key, b"hello world").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open(&key, &sealed).is_err());
    }
}
