//! Credentials / authorized-keys providers (spec §4.7): the narrow
//! interfaces the session core consumes for user records and long-term
//! keypairs, plus filesystem-backed reference implementations using the
//! on-disk formats from spec §6. Callers may substitute their own
//! `UserStore`/`ServerIdentity`/`ClientIdentity` entirely; these are not
//! normative.
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::RsaPublicKey;

use crate::crypto::{RsaKeypair, sha256_hex};
use crate::errors::{Error, Result};

pub trait UserStore: Send + Sync {
    fn exists(&self, username: &str) -> bool;
    fn verify_password(&self, username: &str, password: &str) -> bool;
    fn authorized_keys(&self, username: &str) -> Vec<RsaPublicKey>;
    fn add_user(&self, username: &str, password: &str) -> Result<()>;
    fn remove_user(&self, username: &str) -> Result<()>;
    fn reload(&self) -> Result<()>;
}

pub trait ServerIdentity: Send + Sync {
    fn keypair(&self) -> &RsaKeypair;
}

pub trait ClientIdentity: Send + Sync {
    fn keypair(&self) -> Option<&RsaKeypair>;
}

/// Parses Java-properties-style `key=value` text (spec §6): one entry per
/// line, `#` starts a comment, blank lines ignored.
fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    out
}

fn write_properties(map: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    for key in keys {
        out.push_str(key);
        out.push('=');
        out.push_str(&map[key]);
        out.push('\n');
    }
    out
}

/// Filesystem-backed `UserStore`: passwords in a `users.properties` file,
/// authorized keys as `<dir>/<username>/<keyId>.pub` files each holding a
/// Base64 X.509 SubjectPublicKeyInfo blob.
pub struct FsUserStore {
    users_file: PathBuf,
    authorized_keys_dir: PathBuf,
    passwords: RwLock<HashMap<String, String>>,
    keys: RwLock<HashMap<String, Vec<RsaPublicKey>>>,
}

impl FsUserStore {
    pub fn open(users_file: impl Into<PathBuf>, authorized_keys_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            users_file: users_file.into(),
            authorized_keys_dir: authorized_keys_dir.into(),
            passwords: RwLock::new(HashMap::new()),
            keys: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    fn load_keys_for(dir: &Path, username: &str) -> Result<Vec<RsaPublicKey>> {
        let user_dir = dir.join(username);
        if !user_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in fs::read_dir(&user_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pub") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            keys.push(RsaKeypair::public_from_base64_spki(content.trim())?);
        }
        Ok(keys)
    }
}

impl UserStore for FsUserStore {
    fn exists(&self, username: &str) -> bool {
        self.passwords.read().unwrap().contains_key(username)
    }

    fn verify_password(&self, username: &str, password: &str) -> bool {
        match self.passwords.read().unwrap().get(username) {
            Some(stored_hash) => sha256_hex(password.as_bytes()) == *stored_hash,
            None => false,
        }
    }

    fn authorized_keys(&self, username: &str) -> Vec<RsaPublicKey> {
        self.keys
            .read()
            .unwrap()
            .get(username)
            .cloned()
            .unwrap_or_default()
    }

    fn add_user(&self, username: &str, password: &str) -> Result<()> {
        let mut passwords = self.passwords.write().unwrap();
        passwords.insert(username.to_string(), sha256_hex(password.as_bytes()));
        fs::write(&self.users_file, write_properties(&passwords))?;
        Ok(())
    }

    fn remove_user(&self, username: &str) -> Result<()> {
        let mut passwords = self.passwords.write().unwrap();
        passwords.remove(username);
        fs::write(&self.users_file, write_properties(&passwords))?;
        Ok(())
    }

    /// Re-reads both the password file and the authorized-keys tree from
    /// disk. Holding the write lock for the whole reload is what spec §5
    /// means by serializing reload against in-flight authentication.
    fn reload(&self) -> Result<()> {
        let text = match fs::read_to_string(&self.users_file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let parsed = parse_properties(&text);
        let usernames: Vec<String> = parsed.keys().cloned().collect();
        let mut keys = HashMap::new();
        for username in &usernames {
            keys.insert(
                username.clone(),
                Self::load_keys_for(&self.authorized_keys_dir, username)?,
            );
        }
        *self.passwords.write().unwrap() = parsed;
        *self.keys.write().unwrap() = keys;
        Ok(())
    }
}

/// Filesystem-backed `ServerIdentity`: a long-term RSA keypair persisted
/// as `<dir>/server_rsa_key` (PKCS#8 DER) and `<dir>/server_rsa_key.pub`
/// (Base64 X.509 text), generated on first use.
pub struct FsServerIdentity {
    keypair: RsaKeypair,
}

impl FsServerIdentity {
    pub fn load_or_generate(key_dir: impl AsRef<Path>) -> Result<Self> {
        let key_dir = key_dir.as_ref();
        let private_path = key_dir.join("server_rsa_key");
        let public_path = key_dir.join("server_rsa_key.pub");
        let keypair = if private_path.exists() {
            let der = fs::read(&private_path)?;
            RsaKeypair::from_pkcs8_der(&der)?
        } else {
            fs::create_dir_all(key_dir)?;
            let keypair = RsaKeypair::generate()?;
            fs::write(&private_path, keypair.to_pkcs8_der()?)?;
            fs::write(
                &public_path,
                RsaKeypair::public_to_base64_spki(keypair.public_key())?,
            )?;
            keypair
        };
        Ok(Self { keypair })
    }
}

impl ServerIdentity for FsServerIdentity {
    fn keypair(&self) -> &RsaKeypair {
        &self.keypair
    }
}

/// Filesystem-backed `ClientIdentity`: an optional RSA keypair loaded from
/// a PEM private-key file, used only when public-key or dual auth is
/// configured.
pub struct FsClientIdentity {
    keypair: Option<RsaKeypair>,
}

impl FsClientIdentity {
    pub fn load(private_key_file: Option<&Path>) -> Result<Self> {
        let keypair = match private_key_file {
            Some(path) => {
                let pem = fs::read_to_string(path)?;
                Some(RsaKeypair::from_private_pem(&pem)?)
            }
            None => None,
        };
        Ok(Self { keypair })
    }
}

impl ClientIdentity for FsClientIdentity {
    fn keypair(&self) -> Option<&RsaKeypair> {
        self.keypair.as_ref()
    }
}

/// Base64-decodes and parses an X.509 SubjectPublicKeyInfo public key,
/// as used for `publicKey` fields in AUTH_REQUEST.
pub fn decode_public_key_field(b64: &str) -> Result<RsaPublicKey> {
    RsaKeypair::public_from_base64_spki(b64)
}

pub fn encode_public_key_field(key: &RsaPublicKey) -> Result<String> {
    RsaKeypair::public_to_base64_spki(key)
}

/// Raw Base64 decode helper for binary AUTH_REQUEST fields that aren't
/// themselves SPKI-encoded (e.g. the `signature` field).
pub fn decode_base64(s: &str) -> Result<Vec<u8>> {
    BASE64.decode(s.as_bytes()).map_err(Error::from)
}

/// Raw Base64 encode helper, the inverse of [`decode_base64`]; used to
/// re-encode message fields that `serde` already decoded to bytes before
/// handing them to APIs (like [`crate::auth::Credentials`]) that deal in
/// Base64 strings rather than raw bytes.
pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
