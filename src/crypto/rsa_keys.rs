//! RSA-2048 keypair load/save/sign/verify (SHA-256 with RSA PKCS#1 v1.5),
//! grounded on the teacher crate's `generate_rsa_pkcs8_pair` helper.
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::errors::{Error, Result};

/// A long-term RSA-2048 identity: a server's host key or a client's
/// public-key-auth key.
#[derive(Clone)]
pub struct RsaKeypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeypair {
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, 2048)?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Loads a private key from PKCS#8 DER bytes (spec §6:
    /// `server_keys/server_rsa_key`).
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        Ok(self.private.to_pkcs8_der()?.as_bytes().to_vec())
    }

    /// Loads a public-only key from its Base64 X.509 SubjectPublicKeyInfo
    /// encoding (spec §6: `authorized_keys/<user>/<id>.pub` content, and the
    /// `serverPublicKey`/`publicKey` message fields).
    pub fn public_from_base64_spki(b64: &str) -> Result<RsaPublicKey> {
        let der = BASE64.decode(b64.trim())?;
        Ok(RsaPublicKey::from_public_key_der(&der)?)
    }

    pub fn public_to_base64_spki(key: &RsaPublicKey) -> Result<String> {
        let der = key.to_public_key_der()?;
        Ok(BASE64.encode(der.as_bytes()))
    }

    /// Raw SubjectPublicKeyInfo DER bytes, for callers that want to embed
    /// the key directly in a message field rather than a Base64 string.
    pub fn public_to_der(key: &RsaPublicKey) -> Result<Vec<u8>> {
        Ok(key.to_public_key_der()?.as_bytes().to_vec())
    }

    pub fn public_to_pem(&self) -> Result<String> {
        Ok(self.public.to_public_key_pem(LineEnding::LF)?)
    }

    pub fn private_to_pem(&self) -> Result<String> {
        Ok(self.private.to_pkcs8_pem(LineEnding::LF)?.to_string())
    }

    pub fn from_private_pem(pem: &str) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)?;
        let public = private.to_public_key();
        Ok(Self { private, public })
    }

    /// Signs `message` with SHA-256 + RSA PKCS#1 v1.5, returning the raw
    /// signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha256>::new(self.private.clone());
        let signature = signing_key.sign_with_rng(&mut OsRng, message);
        signature.to_bytes().to_vec()
    }
}

/// Verifies a SHA-256 + RSA PKCS#1 v1.5 signature against `public`.
pub fn verify(public: &RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key = VerifyingKey::<Sha256>::new(public.clone());
    let signature = Signature::try_from(signature)
        .map_err(|_| Error::Internal("malformed RSA signature".to_string()))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::Internal("RSA signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = RsaKeypair::generate().unwrap();
        let message = b"the DH public value goes here";
        let signature = keypair.sign(message);
        verify(keypair.public_key(), message, &signature).unwrap();
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let keypair = RsaKeypair::generate().unwrap();
        let signature = keypair.sign(b"original");
        assert!(verify(keypair.public_key(), b"tampered", &signature).is_err());
    }

    #[test]
    fn pkcs8_der_round_trip() {
        let keypair = RsaKeypair::generate().unwrap();
        let der = keypair.to_pkcs8_der().unwrap();
        let reloaded = RsaKeypair::from_pkcs8_der(&der).unwrap();
        assert_eq!(
            keypair.public_key().to_public_key_der().unwrap().as_bytes(),
            reloaded.public_key().to_public_key_der().unwrap().as_bytes()
        );
    }

    #[test]
    fn spki_base64_round_trip() {
        let keypair = RsaKeypair::generate().unwrap();
        let b64 = RsaKeypair::public_to_base64_spki(keypair.public_key()).unwrap();
        let decoded = RsaKeypair::public_from_base64_spki(&b64).unwrap();
        assert_eq!(decoded, *keypair.public_key());
    }
}
