//! Externally-facing configuration knobs (spec §6). Parsing command-line
//! flags into these structs is out of scope for the core; the core only
//! defines the shape the flags populate.
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Trait implemented by both [`ServerConfig`] and [`ClientConfig`] for the
/// knobs the session supervisor needs regardless of role.
pub trait Configuration {
    /// Per-read socket timeout applied while waiting for the next record.
    fn read_timeout(&self) -> Duration;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub key_dir: PathBuf,
    pub users_file: PathBuf,
    pub authorized_keys_dir: PathBuf,
    pub files_root: PathBuf,
    pub max_connections: usize,
    /// Minutes, per spec §6's `--timeout`; stored converted to a [`Duration`].
    pub timeout: Duration,
    pub log_level: log::LevelFilter,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 2222,
            key_dir: PathBuf::from("server_keys"),
            users_file: PathBuf::from("users.properties"),
            authorized_keys_dir: PathBuf::from("authorized_keys"),
            files_root: PathBuf::from("data/server/files"),
            max_connections: 64,
            timeout: Duration::from_secs(30 * 60),
            log_level: log::LevelFilter::Info,
        }
    }
}

impl Configuration for ServerConfig {
    fn read_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub known_hosts_file: PathBuf,
    pub private_key_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2222,
            username: String::new(),
            known_hosts_file: PathBuf::from("known_hosts"),
            private_key_file: None,
        }
    }
}

impl Configuration for ClientConfig {
    fn read_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}
