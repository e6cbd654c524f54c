//! Trust-on-first-use pinning of the server's RSA host key (Open
//! Question resolution, spec §9 / SPEC_FULL.md §9): the client records a
//! fingerprint of the first server key it sees per `host:port` in a local
//! file and rejects any later mismatch, the same idiom OpenSSH's
//! known_hosts uses (no wire compatibility with it is implied).
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use rsa::RsaPublicKey;

use crate::crypto::sha256_hex;
use crate::crypto::rsa_keys::RsaKeypair;
use crate::errors::Error;
use crate::errors::Result;

fn fingerprint(public_key: &RsaPublicKey) -> Result<String> {
    let der_b64 = RsaKeypair::public_to_base64_spki(public_key)?;
    Ok(sha256_hex(der_b64.as_bytes()))
}

fn load(path: &Path) -> Result<HashMap<String, String>> {
    let mut entries = HashMap::new();
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
        Err(e) => return Err(e.into()),
    };
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((host, fp)) = line.split_once(' ') {
            entries.insert(host.to_string(), fp.to_string());
        }
    }
    Ok(entries)
}

/// Verifies `public_key` against the pinned fingerprint for `host:port`,
/// pinning it on first contact. Returns an error on mismatch.
pub fn verify_or_pin(known_hosts_file: &Path, host: &str, port: u16, public_key: &RsaPublicKey) -> Result<()> {
    let key = format!("{}:{}", host, port);
    let mut entries = load(known_hosts_file)?;
    let got = fingerprint(public_key)?;
    match entries.get(&key) {
        Some(expected) if *expected == got => Ok(()),
        Some(expected) => Err(Error::KnownHostMismatch {
            host: key,
            expected: expected.clone(),
            got,
        }),
        None => {
            entries.insert(key, got);
            let mut out = String::new();
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            for k in keys {
                out.push_str(k);
                out.push(' ');
                out.push_str(&entries[k]);
                out.push('\n');
            }
            if let Some(parent) = known_hosts_file.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(known_hosts_file, out)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_contact_pins_the_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let keypair = RsaKeypair::generate().unwrap();
        verify_or_pin(&path, "127.0.0.1", 2222, keypair.public_key()).unwrap();
        assert!(path.exists());
        // Second verification against the same key succeeds.
        verify_or_pin(&path, "127.0.0.1", 2222, keypair.public_key()).unwrap();
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        let first = RsaKeypair::generate().unwrap();
        let second = RsaKeypair::generate().unwrap();
        verify_or_pin(&path, "127.0.0.1", 2222, first.public_key()).unwrap();
        let result = verify_or_pin(&path, "127.0.0.1", 2222, second.public_key());
        assert!(matches!(result, Err(Error::KnownHostMismatch { .. })));
    }
}
