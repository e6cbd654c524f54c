//! End-to-end scenarios (spec §8): a real client driving a real server
//! over loopback TCP, exercising the full HANDSHAKE -> AUTH -> SERVICE
//! lifecycle rather than any single component in isolation.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use vantage_core::config::{ClientConfig, ServerConfig};
use vantage_core::crypto::RsaKeypair;
use vantage_core::errors::Error;
use vantage_core::providers::{ClientIdentity, FsServerIdentity, FsUserStore, UserStore};
use vantage_core::server::SessionSupervisor;
use vantage_core::Client;

struct StaticIdentity(RsaKeypair);

impl ClientIdentity for StaticIdentity {
    fn keypair(&self) -> Option<&RsaKeypair> {
        Some(&self.0)
    }
}

/// Spins up a server backed by a fresh temp directory, with `admin`/`admin`
/// already registered, listening on `port`. Returns the directory (kept
/// alive for the test's duration) and the client config to reach it.
async fn spawn_server(port: u16) -> (tempfile::TempDir, ClientConfig) {
    let dir = tempdir().unwrap();
    let users_file = dir.path().join("users.properties");
    let authorized_keys_dir = dir.path().join("authorized_keys");
    let files_root = dir.path().join("files");
    let key_dir = dir.path().join("server_keys");
    std::fs::create_dir_all(&authorized_keys_dir).unwrap();
    std::fs::create_dir_all(&files_root).unwrap();

    let store = FsUserStore::open(&users_file, &authorized_keys_dir).unwrap();
    store.add_user("admin", "admin").unwrap();

    let identity = FsServerIdentity::load_or_generate(&key_dir).unwrap();

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port,
        key_dir,
        users_file,
        authorized_keys_dir,
        files_root,
        max_connections: 8,
        timeout: Duration::from_secs(1800),
        log_level: log::LevelFilter::Warn,
    };

    let supervisor = SessionSupervisor::new(config, Arc::new(identity), Arc::new(store));
    tokio::spawn(async move {
        let _ = supervisor.run().await;
    });
    // Give the listener a moment to bind before the client dials in.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client_config = ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "admin".to_string(),
        known_hosts_file: dir.path().join("known_hosts"),
        private_key_file: None,
    };
    (dir, client_config)
}

#[tokio::test]
async fn password_login_shell_command_disconnect() {
    let (_dir, client_config) = spawn_server(18301).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();
    client.request_service("shell").await.unwrap();

    let (exit_code, stdout, stderr, working_directory) =
        client.shell_command("echo hello", "/tmp").await.unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(stdout, "hello\n");
    assert_eq!(stderr, "");
    assert_eq!(working_directory, "/tmp");

    client.disconnect().unwrap();
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let (_dir, client_config) = spawn_server(18302).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    let result = client.authenticate_password("admin", "hunter2").await;
    assert!(matches!(result, Err(Error::AuthRejected)));
}

#[tokio::test]
async fn dual_auth_fails_when_key_is_not_authorized() {
    let (_dir, client_config) = spawn_server(18303).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    let identity = StaticIdentity(RsaKeypair::generate().unwrap());
    // Correct password, but the presented key was never registered in the
    // user's authorized_keys directory, so dual auth must still fail
    // (spec §8 scenario 2's failure mode, here via the unauthorized-key
    // clause rather than a wrong password).
    let result = client
        .authenticate_dual("admin", "admin", &identity)
        .await;
    assert!(matches!(result, Err(Error::AuthRejected)));
}

#[tokio::test]
async fn file_upload_then_download_round_trips() {
    let (_dir, client_config) = spawn_server(18304).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
    client.upload_file("report.bin", &payload).await.unwrap();

    let downloaded = client.download_file("report.bin").await.unwrap();
    assert_eq!(downloaded, payload);
}

#[tokio::test]
async fn empty_file_upload_round_trips() {
    let (_dir, client_config) = spawn_server(18305).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();

    client.upload_file("empty.bin", &[]).await.unwrap();
    let downloaded = client.download_file("empty.bin").await.unwrap();
    assert!(downloaded.is_empty());
}

#[tokio::test]
async fn path_traversal_upload_is_rejected() {
    let (_dir, client_config) = spawn_server(18306).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();

    let result = client.upload_file("../../etc/passwd", b"pwned").await;
    assert!(result.is_err());

    // Nothing should have been written outside the per-user root.
    assert!(!PathBuf::from("/etc/passwd_pwned").exists());
}

#[tokio::test]
async fn known_hosts_pins_server_key_across_reconnects() {
    let (_dir, client_config) = spawn_server(18307).await;

    let mut first = Client::connect(&client_config).await.unwrap();
    first.authenticate_password("admin", "admin").await.unwrap();
    first.disconnect().unwrap();

    // Reconnecting to the same server with the same known_hosts file must
    // still succeed: the pinned fingerprint matches the same long-term key.
    let mut second = Client::connect(&client_config).await.unwrap();
    second.authenticate_password("admin", "admin").await.unwrap();
    second.disconnect().unwrap();
}

#[tokio::test]
async fn reload_users_succeeds_and_is_idempotent() {
    let (_dir, client_config) = spawn_server(18309).await;

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();

    client.reload_users().await.unwrap();
    // Applying it again must not error or otherwise change behavior
    // (spec §8: RELOAD_USERS is idempotent).
    client.reload_users().await.unwrap();

    // The user store is still usable afterward for further commands.
    client.request_service("shell").await.unwrap();
}

#[tokio::test]
async fn local_port_forward_relays_bytes() {
    let (_dir, client_config) = spawn_server(18308).await;

    // A tiny echo server for the forward to dial into.
    let echo_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo_listener.local_addr().unwrap();
    tokio::spawn(async move {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        if let Ok((mut stream, _)) = echo_listener.accept().await {
            let mut buf = vec![0u8; 64];
            if let Ok(n) = stream.read(&mut buf).await {
                let _ = stream.write_all(&buf[..n]).await;
            }
        }
    });

    let mut client = Client::connect(&client_config).await.unwrap();
    client.authenticate_password("admin", "admin").await.unwrap();

    let accepted = client
        .port_forward_request("127.0.0.1", echo_addr.port(), "c1")
        .await
        .unwrap();
    assert!(accepted);

    client.send_port_forward_data("c1", b"ping".to_vec()).unwrap();

    let reply = client.next_message().await.unwrap();
    match reply {
        vantage_core::message::Message::PortForwardData(data) => {
            assert_eq!(data.connection_id, "c1");
            assert_eq!(data.data, b"ping");
        }
        other => panic!("expected PORT_FORWARD_DATA, got {}", other.name()),
    }

    client.close_port_forward("c1").unwrap();
}
