//! Diffie-Hellman key agreement over the fixed 2048-bit MODP Group 14
//! (RFC 3526), generator 2, per spec §4.2.
use num_bigint_dig::{BigUint, RandBigInt};
use num_traits::Num;
use rand::rngs::OsRng;
use std::sync::OnceLock;

use crate::errors::{Error, Result};

const GROUP14_PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD",
    "129024E088A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A43",
    "1B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637E",
    "D6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE4",
    "5B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F83655D23DCA",
    "3AD961C62F356208552BB9ED529077096966D670C354E4ABC9804F1746C08CA",
    "18217C32905E462E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF06",
    "F4C52C9DE2BCBF6955817183995497CEA956AE515D2261898FA051015728E5A",
    "8AACAA68FFFFFFFFFFFFFFFF",
);

/// The fixed DH group used by every session. `p` and `g` are immutable and
/// identical on both client and server; there is no negotiation (spec §1
/// non-goals: no pluggable cipher/KEX negotiation).
#[derive(Clone)]
pub struct DhGroup {
    pub p: BigUint,
    pub g: BigUint,
}

static GROUP14: OnceLock<DhGroup> = OnceLock::new();

impl DhGroup {
    pub fn group14() -> &'static DhGroup {
        GROUP14.get_or_init(|| DhGroup {
            p: BigUint::from_str_radix(GROUP14_PRIME_HEX, 16)
                .expect("GROUP14_PRIME_HEX is a valid hex literal"),
            g: BigUint::from(2u32),
        })
    }
}

/// One side's ephemeral DH keypair for a single handshake. Never reused
/// across sessions (spec §1 non-goals: no rekeying, so each session gets a
/// fresh exchange at connect time only).
pub struct DhKeypair {
    private: BigUint,
    pub public: BigUint,
}

impl DhKeypair {
    pub fn generate() -> Self {
        let group = DhGroup::group14();
        let mut rng = OsRng;
        // A private exponent as wide as the modulus is conservative but
        // simple; there is no negotiated exponent size in this protocol.
        let private = rng.gen_biguint_below(&group.p);
        let public = group.g.modpow(&private, &group.p);
        Self { private, public }
    }

    pub fn shared_secret(&self, peer_public: &BigUint) -> Vec<u8> {
        let group = DhGroup::group14();
        let shared = peer_public.modpow(&self.private, &group.p);
        shared.to_bytes_be()
    }

    /// Encodes `public` in the SubjectPublicKeyInfo-shaped container spec
    /// §3/§4.2 calls for: unlike RSA/EC keys, raw DH public values have no
    /// broadly-supported ASN.1 template in the Rust ecosystem, so this
    /// mirrors SPKI's (algorithm-parameters, public-key-bytes) shape with a
    /// straightforward length-prefixed binary layout rather than a
    /// hand-rolled ASN.1 encoder for a structure no consumer actually
    /// parses with a generic X.509 library.
    pub fn encode_public(public: &BigUint) -> Vec<u8> {
        let group = DhGroup::group14();
        let mut out = Vec::new();
        for field in [&group.p, &group.g, public] {
            let bytes = field.to_bytes_be();
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&bytes);
        }
        out
    }

    pub fn decode_public(bytes: &[u8]) -> Result<BigUint> {
        let mut offset = 0usize;
        let mut fields = Vec::with_capacity(3);
        for _ in 0..3 {
            if bytes.len() < offset + 4 {
                return Err(Error::Internal("truncated DH public key encoding".into()));
            }
            let len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            offset += 4;
            if bytes.len() < offset + len {
                return Err(Error::Internal("truncated DH public key encoding".into()));
            }
            fields.push(BigUint::from_bytes_be(&bytes[offset..offset + len]));
            offset += len;
        }
        let group = DhGroup::group14();
        if fields[0] != group.p || fields[1] != group.g {
            return Err(Error::Internal("DH group parameters mismatch".into()));
        }
        Ok(fields[2].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let client = DhKeypair::generate();
        let server = DhKeypair::generate();
        assert_eq!(
            client.shared_secret(&server.public),
            server.shared_secret(&client.public)
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let keypair = DhKeypair::generate();
        let encoded = DhKeypair::encode_public(&keypair.public);
        let decoded = DhKeypair::decode_public(&encoded).unwrap();
        assert_eq!(decoded, keypair.public);
    }
}
