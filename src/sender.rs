//! The single dedicated writer task per session (spec §5/§9): every
//! outbound message funnels through one `mpsc` queue drained by one task,
//! which is what keeps the per-direction sequence counter monotone and
//! every GCM nonce unique even though shell output, file chunks, and
//! forwarded connection data are all produced concurrently. Grounded on
//! the teacher's `VerdantService` actor in `services.rs`, which uses the
//! same "one task owns the channel, everyone else just sends" shape.
use tokio::io::AsyncWrite;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::errors::Result;
use crate::frame;
use crate::message::Message;

pub enum SenderCommand {
    Send(Message),
    /// Installs the derived session keys and resets the outbound sequence
    /// counter to 0, marking the HANDSHAKE -> AUTH boundary (spec §4.1).
    InstallKeys {
        aes_key: [u8; 32],
        hmac_key: [u8; 32],
    },
}

/// Handle held by everything that needs to emit a message: the receive
/// loop, service handlers, and port-forward relay tasks.
#[derive(Clone)]
pub struct OutgoingQueue {
    tx: UnboundedSender<SenderCommand>,
}

impl OutgoingQueue {
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(SenderCommand::Send(message))
            .map_err(|_| crate::errors::Error::Internal("sender task has stopped".into()))
    }

    pub fn install_keys(&self, aes_key: [u8; 32], hmac_key: [u8; 32]) -> Result<()> {
        self.tx
            .send(SenderCommand::InstallKeys { aes_key, hmac_key })
            .map_err(|_| crate::errors::Error::Internal("sender task has stopped".into()))
    }
}

/// Spawns the writer task over `writer` and returns a queue handle plus a
/// join handle the caller can await to detect the writer dying.
pub fn spawn<W>(writer: W) -> (OutgoingQueue, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(writer, rx));
    (OutgoingQueue { tx }, handle)
}

async fn run<W>(mut writer: W, mut rx: UnboundedReceiver<SenderCommand>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut seq: u32 = 0;
    let mut keys: Option<([u8; 32], [u8; 32])> = None;
    while let Some(command) = rx.recv().await {
        match command {
            SenderCommand::InstallKeys { aes_key, hmac_key } => {
                keys = Some((aes_key, hmac_key));
                seq = 0;
            }
            SenderCommand::Send(message) => {
                let tag = message.tag();
                let payload = message.encode_payload()?;
                match &keys {
                    None => {
                        frame::write_handshake_frame(&mut writer, tag, seq, &payload).await?
                    }
                    Some((aes_key, hmac_key)) => {
                        frame::write_secure_frame(&mut writer, tag, seq, &payload, aes_key, hmac_key)
                            .await?
                    }
                }
                seq = seq.wrapping_add(1);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, ServiceRequest};

    #[tokio::test]
    async fn messages_are_written_in_order_with_increasing_sequence() {
        let (client, mut server) = tokio::io::duplex(8192);
        let (queue, _handle) = spawn(client);
        queue
            .send(Message::ServiceRequest(ServiceRequest {
                service: "shell".to_string(),
            }))
            .unwrap();
        let (tag, seq, _payload) = frame::read_handshake_frame(&mut server).await.unwrap();
        assert_eq!(tag, 6);
        assert_eq!(seq, 0);

        queue
            .send(Message::ServiceRequest(ServiceRequest {
                service: "shell".to_string(),
            }))
            .unwrap();
        let (_tag, seq, _payload) = frame::read_handshake_frame(&mut server).await.unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn installing_keys_resets_sequence_and_switches_to_secure_frames() {
        let (client, mut server) = tokio::io::duplex(8192);
        let (queue, _handle) = spawn(client);
        let aes_key = [3u8; 32];
        let hmac_key = [4u8; 32];
        queue.install_keys(aes_key, hmac_key).unwrap();
        queue
            .send(Message::ServiceRequest(ServiceRequest {
                service: "shell".to_string(),
            }))
            .unwrap();
        let (tag, seq, _payload) = frame::read_secure_frame(&mut server, &aes_key, &hmac_key)
            .await
            .unwrap();
        assert_eq!(tag, 6);
        assert_eq!(seq, 0);
    }
}
