//! Session supervisor and server-side protocol driver (spec §2, §4.3,
//! §5): accepts TCP connections, bounds concurrent sessions with a
//! semaphore-backed worker pool, and drives each accepted connection
//! through HANDSHAKE -> AUTH -> SERVICE exactly as spec §4.3 describes.
//!
//! Grounded on the teacher's `VerdantService::new` (`services.rs`), which
//! spawns a bounded set of tasks against a shared `tokio::runtime::Handle`
//! and drives them from `mpsc` channels; here every accepted connection is
//! its own such task, paired with the dedicated sender task from
//! [`crate::sender`].
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::auth::{self, Credentials};
use crate::config::ServerConfig;
use crate::crypto::rsa_keys::RsaKeypair;
use crate::crypto::{derive_aes_key, derive_hmac_key, DhKeypair};
use crate::errors::{Error, Result};
use crate::executor::{CommandExecutor, ShellExecutor};
use crate::frame;
use crate::message::{KeyExchangeReply, Message, TAG_RESERVED_SHELL_DATA};
use crate::providers::{encode_base64, ServerIdentity, UserStore};
use crate::sender;
use crate::service::files::UploadGuard;
use crate::service::{self, DispatchOutcome, ServiceContext};
use crate::session::{Phase, Role, Session};

/// Per-read timeout during HANDSHAKE and AUTH (spec §5's default 30 s);
/// there is no idle timeout once a session reaches SERVICE.
const INITIAL_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Accepts TCP connections and spawns one session task per connection,
/// bounded by `max_connections` concurrent sessions (spec §2's "session
/// supervisor", spec §7's `ResourceExhausted`).
pub struct SessionSupervisor {
    config: Arc<ServerConfig>,
    identity: Arc<dyn ServerIdentity>,
    user_store: Arc<dyn UserStore>,
    upload_guard: UploadGuard,
    permits: Arc<Semaphore>,
}

impl SessionSupervisor {
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn ServerIdentity>,
        user_store: Arc<dyn UserStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Self {
            config: Arc::new(config),
            identity,
            user_store,
            upload_guard: UploadGuard::new(),
            permits,
        }
    }

    /// Binds the listening socket and accepts connections until an I/O
    /// error on the listener itself (a dropped permission, an
    /// unrecoverable accept failure). Each accepted socket is handed to a
    /// freshly spawned session task; sessions never block the accept
    /// loop.
    pub async fn run(self) -> Result<()> {
        let addr = (self.config.host.as_str(), self.config.port);
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}:{}", self.config.host, self.config.port);

        loop {
            let (stream, peer) = listener.accept().await?;
            let permit = match self.permits.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // spec §7: ResourceExhausted on accept drops the
                    // connection after emitting no bytes at all.
                    warn!("max_connections reached, dropping connection from {}", peer);
                    drop(stream);
                    continue;
                }
            };
            debug!("accepted connection from {}", peer);

            let config = self.config.clone();
            let identity = self.identity.clone();
            let user_store = self.user_store.clone();
            let upload_guard = self.upload_guard.clone();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = run_session(stream, config, identity, user_store, upload_guard).await {
                    warn!("session with {} ended: {}", peer, e);
                }
            });
        }
    }
}

/// Drives one accepted connection through the full lifecycle (spec §2's
/// control flow summary). Every exit path — success, auth failure,
/// protocol violation, transport error — goes through this one function,
/// so session cleanup (spec §9: "the transport, keys, outgoing queue,
/// forward map, and command-executor state are released on all exit
/// paths") happens by simply letting everything fall out of scope.
async fn run_session(
    stream: TcpStream,
    config: Arc<ServerConfig>,
    identity: Arc<dyn ServerIdentity>,
    user_store: Arc<dyn UserStore>,
    upload_guard: UploadGuard,
) -> Result<()> {
    let (mut reader, writer): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = split(stream);
    let (queue, writer_task) = sender::spawn(writer);
    let mut session = Session::new(Role::Server, "/");

    let handshake_result = tokio::time::timeout(
        INITIAL_READ_TIMEOUT,
        run_handshake(&mut reader, &queue, identity.as_ref(), &mut session),
    )
    .await;
    let (aes_key, hmac_key) = match handshake_result {
        Ok(Ok(keys)) => keys,
        Ok(Err(e)) => {
            warn!("handshake failed: {}", e);
            return finish(queue, writer_task).await;
        }
        Err(_) => {
            warn!("handshake timed out");
            return finish(queue, writer_task).await;
        }
    };

    let mut recv_seq: u32 = 0;
    let auth_result = tokio::time::timeout(
        INITIAL_READ_TIMEOUT,
        run_auth(
            &mut reader,
            &queue,
            user_store.as_ref(),
            &session,
            &aes_key,
            &hmac_key,
            &mut recv_seq,
        ),
    )
    .await;
    let username = match auth_result {
        Ok(Ok(username)) => username,
        Ok(Err(_)) | Err(_) => {
            // AUTH_FAILURE (or no reply at all, on timeout) is already
            // queued by `run_auth`; either way AUTH is terminal (spec §4.3).
            return finish(queue, writer_task).await;
        }
    };
    session.username = Some(username.clone());
    session.advance_phase(Phase::Service);
    // No sequence reset here: spec §4.3 resets counters only at the
    // HANDSHAKE -> AUTH boundary (already done once, in `run_handshake`
    // via `SenderCommand::InstallKeys`). `recv_seq` keeps counting across
    // the AUTH -> SERVICE transition since the client's sender never
    // resets its own counter there either.
    info!("session {} authenticated as {}", session.id, username);

    run_service_loop(
        &mut reader,
        queue.clone(),
        &config,
        user_store,
        upload_guard,
        username,
        &aes_key,
        &hmac_key,
        &mut recv_seq,
    )
    .await;

    session.close();
    finish(queue, writer_task).await
}

/// Drops the outgoing queue and waits for the sender task to drain and
/// exit, guaranteeing every message enqueued before this point reaches
/// the wire before the transport closes.
async fn finish(queue: sender::OutgoingQueue, writer_task: tokio::task::JoinHandle<Result<()>>) -> Result<()> {
    drop(queue);
    match writer_task.await {
        Ok(result) => result,
        Err(_) => Ok(()),
    }
}

/// HANDSHAKE phase (spec §4.3, server side): read KEY_EXCHANGE_INIT, reply
/// with a signed KEY_EXCHANGE_REPLY, derive and install the session keys.
async fn run_handshake(
    reader: &mut ReadHalf<TcpStream>,
    queue: &sender::OutgoingQueue,
    identity: &dyn ServerIdentity,
    session: &mut Session,
) -> Result<([u8; 32], [u8; 32])> {
    let (tag, _seq, payload) = frame::read_handshake_frame(reader).await?;
    session.validate_tag(tag)?;
    if tag != 1 {
        return Err(Error::Protocol {
            phase: "HANDSHAKE",
            detail: "expected KEY_EXCHANGE_INIT".to_string(),
        });
    }
    let init = match Message::decode(tag, &payload)? {
        Message::KeyExchangeInit(init) => init,
        _ => unreachable!("tag already checked"),
    };
    debug!("client {} initiated handshake", init.client_id);

    let client_public = DhKeypair::decode_public(&init.dh_public_key)?;
    let server_keypair = DhKeypair::generate();
    let server_public_bytes = DhKeypair::encode_public(&server_keypair.public);
    let signature = identity.keypair().sign(&server_public_bytes);
    let server_public_key_der = RsaKeypair::public_to_der(identity.keypair().public_key())?;

    queue.send(Message::KeyExchangeReply(KeyExchangeReply {
        dh_public_key: server_public_bytes,
        server_id: "vantage-server".to_string(),
        server_public_key: server_public_key_der,
        signature,
        session_id: session.id.to_string(),
    }))?;

    let shared = server_keypair.shared_secret(&client_public);
    let aes_key = derive_aes_key(&shared);
    let hmac_key = derive_hmac_key(&shared);
    queue.install_keys(aes_key, hmac_key)?;
    session.advance_phase(Phase::Auth);
    Ok((aes_key, hmac_key))
}

/// AUTH phase (spec §4.3/§4.4, server side): read exactly one
/// AUTH_REQUEST, decide per §4.4's table, and reply with AUTH_SUCCESS or
/// the constant AUTH_FAILURE. Returns the authenticated username on
/// success.
async fn run_auth(
    reader: &mut ReadHalf<TcpStream>,
    queue: &sender::OutgoingQueue,
    user_store: &dyn UserStore,
    session: &Session,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) -> Result<String> {
    let (tag, seq, payload) = frame::read_secure_frame(reader, aes_key, hmac_key).await?;
    if seq != *recv_seq {
        return Err(Error::Replay {
            expected: *recv_seq,
            got: seq,
        });
    }
    *recv_seq = recv_seq.wrapping_add(1);
    session.validate_tag(tag)?;
    if tag != 3 {
        return Err(Error::Protocol {
            phase: "AUTH",
            detail: "expected AUTH_REQUEST".to_string(),
        });
    }
    let request = match Message::decode(tag, &payload)? {
        Message::AuthRequest(r) => r,
        _ => unreachable!("tag already checked"),
    };

    // Per spec §4.4, `sessionData` is `Base64(sessionId_utf8_bytes)`;
    // message fields the wire already Base64-decoded are re-encoded here
    // since `Credentials` speaks in Base64 strings throughout.
    let session_data = encode_base64(session.id.to_string().as_bytes()).into_bytes();
    let password = request.password.as_deref();
    let public_key_b64 = request.public_key.as_ref().map(|k| encode_base64(k));
    let signature_b64 = request.signature.as_ref().map(|s| encode_base64(s));
    let credentials = Credentials {
        password,
        public_key_b64: public_key_b64.as_deref(),
        signature_b64: signature_b64.as_deref(),
        session_data: &session_data,
    };

    let accepted = match auth::authenticate(user_store, &request.username, request.auth_type, &credentials) {
        Ok(ok) => ok,
        Err(e) => {
            debug!("auth decision error for {}: {}", request.username, e);
            false
        }
    };

    if accepted {
        queue.send(Message::auth_success("authentication succeeded"))?;
        Ok(request.username)
    } else {
        queue.send(Message::auth_failure())?;
        Err(Error::AuthRejected)
    }
}

/// SERVICE phase (spec §4.5, server side): the dispatch loop. Runs until
/// DISCONNECT, a transport/framing/crypto/replay error (all fatal per
/// spec §7), or repeated unexpected messages.
#[allow(clippy::too_many_arguments)]
async fn run_service_loop(
    reader: &mut ReadHalf<TcpStream>,
    queue: sender::OutgoingQueue,
    config: &ServerConfig,
    user_store: Arc<dyn UserStore>,
    upload_guard: UploadGuard,
    username: String,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) {
    let files_root: PathBuf = config.files_root.clone();
    let executor: Box<dyn CommandExecutor> = Box::new(ShellExecutor::new(
        std::env::var("HOME").unwrap_or_else(|_| "/".to_string()),
    ));
    let mut ctx = ServiceContext::new(
        queue,
        username,
        files_root,
        user_store,
        executor,
        upload_guard,
    );
    loop {
        let (tag, seq, payload) = match frame::read_secure_frame(reader, aes_key, hmac_key).await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("transport closed for {}: {}", ctx.username, e);
                break;
            }
        };
        if seq != *recv_seq {
            warn!(
                "replay/reorder detected for {} (expected {}, got {}), closing session",
                ctx.username, recv_seq, seq
            );
            break;
        }
        *recv_seq = recv_seq.wrapping_add(1);

        if tag == TAG_RESERVED_SHELL_DATA {
            let _ = ctx.queue.send(Message::error(
                "RESERVED_TAG",
                "tag 8 (SHELL_DATA) is reserved and unused",
            ));
            continue;
        }
        let message = match Message::decode(tag, &payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("unknown message type from {}: {}", ctx.username, e);
                break;
            }
        };

        match service::dispatch(&mut ctx, reader, message, aes_key, hmac_key, recv_seq).await {
            Ok(DispatchOutcome::Continue) => continue,
            Ok(DispatchOutcome::Disconnect) => break,
            Err(e) if e.is_fatal_in_service() => {
                warn!("fatal error in service loop for {}: {}", ctx.username, e);
                break;
            }
            Err(e) => {
                let _ = ctx.queue.send(Message::error("SERVICE_ERROR", e.to_string()));
            }
        }
    }
}
