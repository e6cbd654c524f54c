//! Record framing (spec §4.1): a length-prefixed inner frame carrying a
//! one-byte type tag, a four-byte sequence number, the JSON payload, and a
//! 32-byte HMAC-SHA256 trailer, optionally wrapped a second time in
//! AES-256-GCM once the handshake has produced session keys.
//!
//! The two handshake messages (KEY_EXCHANGE_INIT/REPLY, tags 1 and 2) are
//! exchanged before either side has a shared secret, so they carry a
//! zero-filled MAC trailer instead of a real one and are never
//! AES-GCM-wrapped; every later record is both HMAC-trailed and
//! GCM-sealed, which is intentionally redundant (spec §4.2 decision to keep
//! both layers rather than trust GCM's tag alone).
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{open, seal};
use crate::errors::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hard ceiling on inner-frame size (tag + seq + payload + mac), spec §4.1.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;
pub const HMAC_LEN: usize = 32;
const LEN_PREFIX_LEN: usize = 4;
const TAG_LEN: usize = 1;
const SEQ_LEN: usize = 4;

fn compute_hmac(key: &[u8; 32], tag: u8, sequence: u32, payload: &[u8]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(&[tag]);
    mac.update(&sequence.to_be_bytes());
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// Builds the inner frame body: `tag ‖ seq ‖ payload ‖ mac`. When
/// `hmac_key` is `None` (handshake phase) the trailer is 32 zero bytes.
fn build_inner(tag: u8, sequence: u32, payload: &[u8], hmac_key: Option<&[u8; 32]>) -> Vec<u8> {
    let mut out = Vec::with_capacity(TAG_LEN + SEQ_LEN + payload.len() + HMAC_LEN);
    out.push(tag);
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(payload);
    match hmac_key {
        Some(key) => out.extend_from_slice(&compute_hmac(key, tag, sequence, payload)),
        None => out.extend_from_slice(&[0u8; HMAC_LEN]),
    }
    out
}

/// Parses and, if `hmac_key` is given, verifies an inner frame body.
/// Returns `(tag, sequence, payload)`.
fn parse_inner(body: &[u8], hmac_key: Option<&[u8; 32]>) -> Result<(u8, u32, Vec<u8>)> {
    if body.len() < TAG_LEN + SEQ_LEN + HMAC_LEN {
        return Err(Error::ShortRead {
            expected: TAG_LEN + SEQ_LEN + HMAC_LEN,
            got: body.len(),
        });
    }
    let tag = body[0];
    let sequence = u32::from_be_bytes(body[1..5].try_into().unwrap());
    let payload_end = body.len() - HMAC_LEN;
    let payload = &body[5..payload_end];
    let trailer = &body[payload_end..];
    if let Some(key) = hmac_key {
        let expected = compute_hmac(key, tag, sequence, payload);
        // Constant-time comparison: a timing side channel on MAC
        // verification would otherwise leak HMAC bytes one at a time.
        use subtle_compare::ct_eq;
        if !ct_eq(&expected, trailer) {
            return Err(Error::BadMac);
        }
    }
    Ok((tag, sequence, payload.to_vec()))
}

mod subtle_compare {
    /// Minimal constant-time byte equality; avoids pulling in `subtle` for a
    /// single comparison while still not short-circuiting on first mismatch.
    pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}

async fn write_length_prefixed<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_length_prefixed<R: AsyncRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; LEN_PREFIX_LEN];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > max_len {
        return Err(Error::OversizeFrame(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Writes a handshake-phase record (tag 1 or 2) with a zero-filled MAC and
/// no outer encryption.
pub async fn write_handshake_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    sequence: u32,
    payload: &[u8],
) -> Result<()> {
    let body = build_inner(tag, sequence, payload, None);
    write_length_prefixed(writer, &body).await
}

/// Reads a handshake-phase record. The MAC trailer is present but not
/// checked, since no HMAC key exists yet.
pub async fn read_handshake_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(u8, u32, Vec<u8>)> {
    let body = read_length_prefixed(reader, MAX_FRAME_LEN).await?;
    parse_inner(&body, None)
}

/// Writes a post-handshake record: the inner frame is HMAC-trailed, then
/// the whole thing is sealed under AES-256-GCM (fresh IV per call) and
/// length-prefixed again for the outer wire encoding.
pub async fn write_secure_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    sequence: u32,
    payload: &[u8],
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
) -> Result<()> {
    let inner = build_inner(tag, sequence, payload, Some(hmac_key));
    let sealed = seal(aes_key, &inner)?;
    write_length_prefixed(writer, &sealed).await
}

/// Maximum outer (sealed) frame size: inner max plus GCM's 12-byte IV and
/// 16-byte tag.
const MAX_SEALED_LEN: usize = MAX_FRAME_LEN + 12 + 16;

/// Reads and unseals a post-handshake record, verifying both the GCM tag
/// and the inner HMAC trailer.
pub async fn read_secure_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
) -> Result<(u8, u32, Vec<u8>)> {
    let sealed = read_length_prefixed(reader, MAX_SEALED_LEN).await?;
    let inner = open(aes_key, &sealed)?;
    parse_inner(&inner, Some(hmac_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn handshake_frame_round_trips() {
        let (mut a, mut b) = duplex(4096);
        write_handshake_frame(&mut a, 1, 0, b"hello").await.unwrap();
        let (tag, seq, payload) = read_handshake_frame(&mut b).await.unwrap();
        assert_eq!(tag, 1);
        assert_eq!(seq, 0);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn secure_frame_round_trips() {
        let aes_key = [1u8; 32];
        let hmac_key = [2u8; 32];
        let (mut a, mut b) = duplex(4096);
        write_secure_frame(&mut a, 9, 3, b"payload bytes", &aes_key, &hmac_key)
            .await
            .unwrap();
        let (tag, seq, payload) = read_secure_frame(&mut b, &aes_key, &hmac_key)
            .await
            .unwrap();
        assert_eq!(tag, 9);
        assert_eq!(seq, 3);
        assert_eq!(payload, b"payload bytes");
    }

    #[tokio::test]
    async fn secure_frame_rejects_wrong_hmac_key() {
        let aes_key = [1u8; 32];
        let (mut a, mut b) = duplex(4096);
        write_secure_frame(&mut a, 9, 3, b"payload", &aes_key, &[2u8; 32])
            .await
            .unwrap();
        let result = read_secure_frame(&mut b, &aes_key, &[9u8; 32]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let (mut a, mut b) = duplex(8);
        // Hand-craft an oversize length prefix without allocating 1 MiB.
        let len = (MAX_FRAME_LEN + 1) as u32;
        a.write_all(&len.to_be_bytes()).await.unwrap();
        drop(a);
        let result = read_handshake_frame(&mut b).await;
        assert!(matches!(result, Err(Error::OversizeFrame(_))));
    }
}
