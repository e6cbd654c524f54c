//! Client-side session driver (spec §4.3's client half of the state
//! machine): connect, perform the handshake, authenticate, then drive the
//! service-phase request/response exchanges directly — the client's side
//! of this protocol is a sequence of simple round trips, so unlike the
//! server it has no dispatch table, just one method per operation.
use std::path::Path;

use log::info;
use num_bigint_dig::BigUint;
use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::crypto::rsa_keys::{verify, RsaKeypair};
use crate::crypto::{derive_aes_key, derive_hmac_key, DhKeypair};
use crate::errors::{Error, Result};
use crate::frame;
use crate::message::{
    AuthRequest, AuthType, FileAck, FileData, KeyExchangeInit, KeyExchangeReply, Message,
    PortForwardClose, PortForwardData, PortForwardRequest, ServiceRequest, ShellCommand,
};
use crate::providers::ClientIdentity;
use crate::sender::{self, OutgoingQueue};

const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

pub struct Client {
    reader: ReadHalf<TcpStream>,
    queue: OutgoingQueue,
    aes_key: [u8; 32],
    hmac_key: [u8; 32],
    recv_seq: u32,
    pub session_id: String,
}

impl Client {
    /// Connects, runs the DH handshake, verifies the server's signature,
    /// and pins its key via [`crate::known_hosts`] (TOFU). Returns a
    /// client positioned at the start of AUTH.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let (mut reader, writer): (ReadHalf<TcpStream>, WriteHalf<TcpStream>) = split(stream);

        let keypair = DhKeypair::generate();
        let client_id = Uuid::new_v4().to_string();
        let (queue, _writer_task) = sender::spawn(writer);
        queue.send(Message::KeyExchangeInit(KeyExchangeInit {
            dh_public_key: DhKeypair::encode_public(&keypair.public),
            client_id,
        }))?;

        let (tag, _seq, payload) = frame::read_handshake_frame(&mut reader).await?;
        if tag != 2 {
            return Err(Error::Protocol {
                phase: "HANDSHAKE",
                detail: "expected KEY_EXCHANGE_REPLY".to_string(),
            });
        }
        let reply = match Message::decode(tag, &payload)? {
            Message::KeyExchangeReply(r) => r,
            _ => unreachable!("tag already checked"),
        };

        let server_public_key = {
            use pkcs8::DecodePublicKey;
            rsa::RsaPublicKey::from_public_key_der(&reply.server_public_key)?
        };
        crate::known_hosts::verify_or_pin(
            &config.known_hosts_file,
            &config.host,
            config.port,
            &server_public_key,
        )?;
        verify(&server_public_key, &reply.dh_public_key, &reply.signature)?;

        let shared = keypair.shared_secret(&peer_public_from(&reply)?);
        let aes_key = derive_aes_key(&shared);
        let hmac_key = derive_hmac_key(&shared);
        queue.install_keys(aes_key, hmac_key)?;

        info!("handshake complete, session {}", reply.session_id);
        Ok(Self {
            reader,
            queue,
            aes_key,
            hmac_key,
            recv_seq: 0,
            session_id: reply.session_id,
        })
    }

    async fn read_one(&mut self) -> Result<Message> {
        let (tag, seq, payload) =
            frame::read_secure_frame(&mut self.reader, &self.aes_key, &self.hmac_key).await?;
        if seq != self.recv_seq {
            return Err(Error::Replay {
                expected: self.recv_seq,
                got: seq,
            });
        }
        self.recv_seq = self.recv_seq.wrapping_add(1);
        Message::decode(tag, &payload)
    }

    /// Password authentication (spec §4.4).
    pub async fn authenticate_password(&mut self, username: &str, password: &str) -> Result<()> {
        self.queue.send(Message::AuthRequest(AuthRequest {
            username: username.to_string(),
            auth_type: AuthType::Password,
            password: Some(password.to_string()),
            public_key: None,
            signature: None,
        }))?;
        self.expect_auth_success().await
    }

    /// Public-key authentication: signs `Base64(sessionId)` with the
    /// client's long-term key (spec §4.4's `sessionData`).
    pub async fn authenticate_public_key(
        &mut self,
        username: &str,
        identity: &dyn ClientIdentity,
    ) -> Result<()> {
        let keypair = identity
            .keypair()
            .ok_or(Error::MissingCredential("clientPrivateKey"))?;
        let session_data = self.session_data();
        let signature = keypair.sign(&session_data);
        self.queue.send(Message::AuthRequest(AuthRequest {
            username: username.to_string(),
            auth_type: AuthType::PublicKey,
            password: None,
            public_key: Some(encode_public_key_bytes(keypair)?),
            signature: Some(signature),
        }))?;
        self.expect_auth_success().await
    }

    pub async fn authenticate_dual(
        &mut self,
        username: &str,
        password: &str,
        identity: &dyn ClientIdentity,
    ) -> Result<()> {
        let keypair = identity
            .keypair()
            .ok_or(Error::MissingCredential("clientPrivateKey"))?;
        let session_data = self.session_data();
        let signature = keypair.sign(&session_data);
        self.queue.send(Message::AuthRequest(AuthRequest {
            username: username.to_string(),
            auth_type: AuthType::Dual,
            password: Some(password.to_string()),
            public_key: Some(encode_public_key_bytes(keypair)?),
            signature: Some(signature),
        }))?;
        self.expect_auth_success().await
    }

    /// Per spec §4.4, the bytes a client must sign for public-key/dual
    /// auth are `Base64(sessionId_utf8_bytes)`, not the raw session id.
    fn session_data(&self) -> Vec<u8> {
        crate::providers::encode_base64(self.session_id.as_bytes()).into_bytes()
    }

    async fn expect_auth_success(&mut self) -> Result<()> {
        match self.read_one().await? {
            Message::AuthSuccess(_) => Ok(()),
            Message::AuthFailure(_) => Err(Error::AuthRejected),
            other => Err(Error::Protocol {
                phase: "AUTH",
                detail: format!("unexpected {} while awaiting auth result", other.name()),
            }),
        }
    }

    pub async fn request_service(&mut self, service: &str) -> Result<()> {
        self.queue.send(Message::ServiceRequest(ServiceRequest {
            service: service.to_string(),
        }))?;
        match self.read_one().await? {
            Message::ServiceAccept(_) => Ok(()),
            other => Err(Error::Protocol {
                phase: "SERVICE",
                detail: format!("unexpected {} while awaiting SERVICE_ACCEPT", other.name()),
            }),
        }
    }

    pub async fn shell_command(&mut self, command: &str, working_directory: &str) -> Result<(i32, String, String, String)> {
        self.queue.send(Message::ShellCommand(ShellCommand {
            command: command.to_string(),
            working_directory: working_directory.to_string(),
        }))?;
        match self.read_one().await? {
            Message::ShellResult(r) => Ok((r.exit_code, r.stdout, r.stderr, r.working_directory)),
            Message::Error(e) => Err(Error::Executor(e.error_message)),
            other => Err(Error::Protocol {
                phase: "SERVICE",
                detail: format!("unexpected {} while awaiting SHELL_RESULT", other.name()),
            }),
        }
    }

    pub async fn upload_file(&mut self, target_path: &str, data: &[u8]) -> Result<()> {
        self.queue.send(Message::FileUploadRequest(crate::message::FileUploadRequest {
            filename: Path::new(target_path)
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_size: data.len() as u64,
            target_path: target_path.to_string(),
        }))?;
        match self.read_one().await? {
            Message::FileAck(ack) if ack.status == "ready" => {}
            Message::Error(e) => return Err(Error::Executor(e.error_message)),
            other => {
                return Err(Error::Protocol {
                    phase: "SERVICE",
                    detail: format!("unexpected {} while awaiting upload readiness", other.name()),
                })
            }
        }

        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[][..]]
        } else {
            data.chunks(DOWNLOAD_CHUNK_SIZE).collect()
        };
        let last_index = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            self.queue.send(Message::FileData(FileData {
                filename: None,
                file_size: None,
                sequence_number: i as u32,
                data: chunk.to_vec(),
                is_last: i == last_index,
            }))?;
        }

        match self.read_one().await? {
            Message::FileAck(ack) if ack.status == "completed" => Ok(()),
            Message::Error(e) => Err(Error::Executor(e.error_message)),
            other => Err(Error::Protocol {
                phase: "SERVICE",
                detail: format!("unexpected {} while awaiting upload completion", other.name()),
            }),
        }
    }

    pub async fn download_file(&mut self, filename: &str) -> Result<Vec<u8>> {
        self.queue.send(Message::FileDownloadRequest(crate::message::FileDownloadRequest {
            filename: filename.to_string(),
            target_path: filename.to_string(),
        }))?;
        let mut out = Vec::new();
        loop {
            match self.read_one().await? {
                Message::FileData(chunk) => {
                    out.extend_from_slice(&chunk.data);
                    if chunk.is_last {
                        break;
                    }
                }
                Message::Error(e) => return Err(Error::NotFound(e.error_message)),
                other => {
                    return Err(Error::Protocol {
                        phase: "SERVICE",
                        detail: format!("unexpected {} while downloading", other.name()),
                    })
                }
            }
        }
        self.queue.send(Message::FileAck(FileAck {
            sequence_number: 0,
            status: "received".to_string(),
            message: String::new(),
        }))?;
        Ok(out)
    }

    pub async fn port_forward_request(
        &mut self,
        dest_host: &str,
        dest_port: u16,
        connection_id: &str,
    ) -> Result<bool> {
        self.queue.send(Message::PortForwardRequest(PortForwardRequest {
            forward_type: crate::message::ForwardType::Local,
            source_port: 0,
            dest_host: dest_host.to_string(),
            dest_port,
            connection_id: connection_id.to_string(),
        }))?;
        match self.read_one().await? {
            Message::PortForwardAccept(accept) => Ok(accept.success),
            other => Err(Error::Protocol {
                phase: "SERVICE",
                detail: format!("unexpected {} while awaiting PORT_FORWARD_ACCEPT", other.name()),
            }),
        }
    }

    pub fn send_port_forward_data(&self, connection_id: &str, data: Vec<u8>) -> Result<()> {
        self.queue.send(Message::PortForwardData(PortForwardData {
            connection_id: connection_id.to_string(),
            data,
        }))
    }

    pub fn close_port_forward(&self, connection_id: &str) -> Result<()> {
        self.queue.send(Message::PortForwardClose(PortForwardClose {
            connection_id: connection_id.to_string(),
        }))
    }

    /// Reads the next server-initiated message (used while a port forward
    /// is open and PORT_FORWARD_DATA may arrive at any time).
    pub async fn next_message(&mut self) -> Result<Message> {
        self.read_one().await
    }

    pub fn disconnect(&self) -> Result<()> {
        self.queue.send(Message::Disconnect)
    }

    /// Asks the server to re-read its credentials provider from disk
    /// (spec §3 tag 17, §4.5).
    pub async fn reload_users(&mut self) -> Result<()> {
        self.queue.send(Message::ReloadUsers)?;
        match self.read_one().await? {
            Message::ServiceAccept(_) => Ok(()),
            Message::Error(e) => Err(Error::Executor(e.error_message)),
            other => Err(Error::Protocol {
                phase: "SERVICE",
                detail: format!("unexpected {} while awaiting RELOAD_USERS result", other.name()),
            }),
        }
    }
}

fn encode_public_key_bytes(keypair: &RsaKeypair) -> Result<Vec<u8>> {
    RsaKeypair::public_to_der(keypair.public_key())
}

fn peer_public_from(reply: &KeyExchangeReply) -> Result<BigUint> {
    DhKeypair::decode_public(&reply.dh_public_key)
}
