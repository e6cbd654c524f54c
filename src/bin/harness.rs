//! A runnable harness binary wiring the filesystem-backed reference
//! providers (spec §6) into [`vantage_core::SessionSupervisor`]. Parsing a
//! real command-line surface (spec §6's `--port`/`--host`/... flags) is
//! out of scope for the core; this binary only reads the handful of knobs
//! needed to demonstrate the crate end to end from environment variables,
//! with [`ServerConfig::default`] filling in everything else.
use std::path::PathBuf;
use std::sync::Arc;

use vantage_core::config::ServerConfig;
use vantage_core::providers::{FsServerIdentity, FsUserStore};
use vantage_core::server::SessionSupervisor;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_path_or(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let defaults = ServerConfig::default();
    let config = ServerConfig {
        host: env_or("VANTAGE_HOST", defaults.host),
        port: env_or("VANTAGE_PORT", defaults.port),
        key_dir: env_path_or("VANTAGE_KEY_DIR", defaults.key_dir),
        users_file: env_path_or("VANTAGE_USERS_FILE", defaults.users_file),
        authorized_keys_dir: env_path_or("VANTAGE_AUTH_KEYS_DIR", defaults.authorized_keys_dir),
        files_root: env_path_or("VANTAGE_FILES_ROOT", defaults.files_root),
        max_connections: env_or("VANTAGE_MAX_CONNECTIONS", defaults.max_connections),
        ..defaults
    };

    if let Some(parent) = config.users_file.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    let _ = std::fs::create_dir_all(&config.authorized_keys_dir);
    let _ = std::fs::create_dir_all(&config.files_root);

    let identity = match FsServerIdentity::load_or_generate(&config.key_dir) {
        Ok(identity) => Arc::new(identity),
        Err(e) => {
            eprintln!("failed to load or generate server identity: {}", e);
            std::process::exit(2);
        }
    };
    let user_store = match FsUserStore::open(&config.users_file, &config.authorized_keys_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open user store: {}", e);
            std::process::exit(2);
        }
    };

    let supervisor = SessionSupervisor::new(config, identity, user_store);
    if let Err(e) = supervisor.run().await {
        eprintln!("server exited: {}", e);
        std::process::exit(2);
    }
}
