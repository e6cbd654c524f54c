//! Authentication subsystem (spec §4.4): password, public-key, and dual
//! modes, decided from a credentials bag rather than from the raw
//! AUTH_REQUEST message so the decision table can be unit-tested in
//! isolation from message decoding.
use crate::crypto::rsa_keys::verify;
use crate::errors::{Error, Result};
use crate::message::AuthType;
use crate::providers::{decode_base64, decode_public_key_field};
use crate::providers::UserStore;

/// The credentials a single AUTH_REQUEST carries, already Base64-decoded
/// where applicable. Mirrors spec §4.4's `credentials` map.
pub struct Credentials<'a> {
    pub password: Option<&'a str>,
    pub public_key_b64: Option<&'a str>,
    pub signature_b64: Option<&'a str>,
    /// `Base64(sessionId_utf8_bytes)` — what the client must have signed.
    pub session_data: &'a [u8],
}

fn check_password(store: &dyn UserStore, username: &str, creds: &Credentials) -> Result<bool> {
    let password = creds
        .password
        .ok_or(Error::MissingCredential("password"))?;
    Ok(store.exists(username) && store.verify_password(username, password))
}

fn check_public_key(store: &dyn UserStore, username: &str, creds: &Credentials) -> Result<bool> {
    let public_key_b64 = creds
        .public_key_b64
        .ok_or(Error::MissingCredential("publicKey"))?;
    let signature_b64 = creds
        .signature_b64
        .ok_or(Error::MissingCredential("signature"))?;
    if !store.exists(username) {
        return Ok(false);
    }
    let presented = decode_public_key_field(public_key_b64)?;
    let known = store.authorized_keys(username);
    if !known.iter().any(|k| *k == presented) {
        return Ok(false);
    }
    let signature = decode_base64(signature_b64)?;
    Ok(verify(&presented, creds.session_data, &signature).is_ok())
}

/// Decides whether `username` authenticates with `auth_type` and
/// `credentials` against `store`. Never reveals which clause failed; the
/// caller is responsible for emitting the constant AUTH_FAILURE message
/// (spec §4.4).
pub fn authenticate(
    store: &dyn UserStore,
    username: &str,
    auth_type: AuthType,
    credentials: &Credentials,
) -> Result<bool> {
    match auth_type {
        AuthType::Password => check_password(store, username, credentials),
        AuthType::PublicKey => check_public_key(store, username, credentials),
        AuthType::Dual => {
            Ok(check_password(store, username, credentials)?
                && check_public_key(store, username, credentials)?)
        }
        AuthType::Unknown(value) => Err(Error::UnknownAuthType(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaKeypair;
    use crate::providers::FsUserStore;
    use std::fs;
    use tempfile::tempdir;

    fn make_store(dir: &std::path::Path) -> FsUserStore {
        let users_file = dir.join("users.properties");
        let keys_dir = dir.join("authorized_keys");
        fs::write(
            &users_file,
            "admin=8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918\n",
        )
        .unwrap();
        fs::create_dir_all(&keys_dir).unwrap();
        FsUserStore::open(&users_file, &keys_dir).unwrap()
    }

    #[test]
    fn password_auth_accepts_correct_password() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let creds = Credentials {
            password: Some("admin"),
            public_key_b64: None,
            signature_b64: None,
            session_data: b"",
        };
        assert!(authenticate(&store, "admin", AuthType::Password, &creds).unwrap());
    }

    #[test]
    fn password_auth_rejects_wrong_password() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let creds = Credentials {
            password: Some("wrong"),
            public_key_b64: None,
            signature_b64: None,
            session_data: b"",
        };
        assert!(!authenticate(&store, "admin", AuthType::Password, &creds).unwrap());
    }

    #[test]
    fn password_auth_missing_credential_errors() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let creds = Credentials {
            password: None,
            public_key_b64: None,
            signature_b64: None,
            session_data: b"",
        };
        assert!(matches!(
            authenticate(&store, "admin", AuthType::Password, &creds),
            Err(Error::MissingCredential(_))
        ));
    }

    #[test]
    fn public_key_auth_rejects_key_not_in_authorized_set() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let keypair = RsaKeypair::generate().unwrap();
        let public_key_b64 = RsaKeypair::public_to_base64_spki(keypair.public_key()).unwrap();
        let session_data = b"session-id-bytes";
        let signature = keypair.sign(session_data);
        use base64::Engine;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(&signature);
        let creds = Credentials {
            password: None,
            public_key_b64: Some(&public_key_b64),
            signature_b64: Some(&signature_b64),
            session_data,
        };
        // `admin` has no authorized keys configured, so even a valid
        // signature over a key nobody has registered must be rejected.
        assert!(!authenticate(&store, "admin", AuthType::PublicKey, &creds).unwrap());
    }

    #[test]
    fn dual_auth_requires_both_factors() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let keypair = RsaKeypair::generate().unwrap();
        let public_key_b64 = RsaKeypair::public_to_base64_spki(keypair.public_key()).unwrap();
        let session_data = b"session-id-bytes";
        let signature = keypair.sign(session_data);
        use base64::Engine;
        let signature_b64 = base64::engine::general_purpose::STANDARD.encode(&signature);
        let creds = Credentials {
            password: Some("admin"),
            public_key_b64: Some(&public_key_b64),
            signature_b64: Some(&signature_b64),
            session_data,
        };
        // Password is correct but the key isn't authorized, so dual must fail.
        assert!(!authenticate(&store, "admin", AuthType::Dual, &creds).unwrap());
    }

    #[test]
    fn unknown_user_rejected_without_disclosure() {
        let dir = tempdir().unwrap();
        let store = make_store(dir.path());
        let creds = Credentials {
            password: Some("whatever"),
            public_key_b64: None,
            signature_b64: None,
            session_data: b"",
        };
        assert!(!authenticate(&store, "ghost", AuthType::Password, &creds).unwrap());
    }
}
