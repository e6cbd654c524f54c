//! Port-forward multiplexing (spec §4.6): LOCAL forwards (server dials
//! out on the client's behalf) and REMOTE forwards (server listens and
//! relays inbound connections back over the session). Every byte that
//! crosses the session goes through the sender task's queue; relay tasks
//! never write to the transport directly (spec §5's single-writer
//! invariant).
use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::message::{ForwardType, Message, PortForwardAccept, PortForwardClose, PortForwardData};
use crate::sender::OutgoingQueue;

/// Bytes moved per relay read, spec §4.6.
const CHUNK_SIZE: usize = 8 * 1024;

struct ForwardEntry {
    data_tx: UnboundedSender<Vec<u8>>,
    relay_task: tokio::task::JoinHandle<()>,
}

/// The live connectionId -> forward table for one session. Shared between
/// the receive loop (routes PORT_FORWARD_DATA/CLOSE into it) and the
/// relay tasks it spawns (which remove their own entry on EOF/error).
#[derive(Clone)]
pub struct ForwardRegistry {
    inner: Arc<Mutex<HashMap<String, ForwardEntry>>>,
}

impl ForwardRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Routes inbound PORT_FORWARD_DATA to the relay owning `connection_id`.
    /// Silently ignored if the id is unknown (spec §4.6: "subsequent DATA
    /// for c1 is ignored" after close).
    pub async fn forward_data(&self, connection_id: &str, data: Vec<u8>) {
        let entries = self.inner.lock().await;
        if let Some(entry) = entries.get(connection_id) {
            let _ = entry.data_tx.send(data);
        }
    }

    /// Removes and cancels the relay for `connection_id`, if present.
    pub async fn close(&self, connection_id: &str) {
        let removed = self.inner.lock().await.remove(connection_id);
        if let Some(entry) = removed {
            entry.relay_task.abort();
        }
    }

    async fn insert(&self, connection_id: String, data_tx: UnboundedSender<Vec<u8>>, relay_task: tokio::task::JoinHandle<()>) {
        self.inner
            .lock()
            .await
            .insert(connection_id, ForwardEntry { data_tx, relay_task });
    }
}

/// Spawns the relay task that owns `stream`'s read half (forwarding bytes
/// out as PORT_FORWARD_DATA) and write half (fed by `data_rx`, which
/// carries bytes decoded from inbound PORT_FORWARD_DATA).
fn spawn_relay(
    registry: ForwardRegistry,
    queue: OutgoingQueue,
    connection_id: String,
    stream: TcpStream,
) -> (UnboundedSender<Vec<u8>>, tokio::task::JoinHandle<()>) {
    let (data_tx, mut data_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (mut read_half, mut write_half) = stream.into_split();
    let relay_connection_id = connection_id.clone();
    let relay_registry = registry.clone();
    let relay_queue = queue.clone();
    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            tokio::select! {
                read_result = read_half.read(&mut buf) => {
                    match read_result {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let _ = relay_queue.send(Message::PortForwardData(PortForwardData {
                                connection_id: relay_connection_id.clone(),
                                data: buf[..n].to_vec(),
                            }));
                        }
                    }
                }
                maybe_chunk = data_rx.recv() => {
                    match maybe_chunk {
                        Some(chunk) => {
                            if write_half.write_all(&chunk).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        relay_registry.close(&relay_connection_id).await;
        let _ = relay_queue.send(Message::PortForwardClose(PortForwardClose {
            connection_id: relay_connection_id,
        }));
    });
    (data_tx, task)
}

/// Handles PORT_FORWARD_REQUEST. LOCAL dials the destination immediately
/// and replies with one PORT_FORWARD_ACCEPT; REMOTE binds a listener and
/// replies with one PORT_FORWARD_ACCEPT per accepted inbound connection,
/// spawning its own accept-loop task (spec §4.6).
pub async fn handle_request(
    registry: &ForwardRegistry,
    queue: &OutgoingQueue,
    forward_type: ForwardType,
    source_port: u16,
    dest_host: String,
    dest_port: u16,
    connection_id: String,
) -> Result<()> {
    match forward_type {
        ForwardType::Local => {
            match TcpStream::connect((dest_host.as_str(), dest_port)).await {
                Ok(stream) => {
                    let (data_tx, task) =
                        spawn_relay(registry.clone(), queue.clone(), connection_id.clone(), stream);
                    registry.insert(connection_id.clone(), data_tx, task).await;
                    queue.send(Message::PortForwardAccept(PortForwardAccept {
                        connection_id,
                        success: true,
                        error_message: None,
                    }))?;
                }
                Err(e) => {
                    queue.send(Message::PortForwardAccept(PortForwardAccept {
                        connection_id,
                        success: false,
                        error_message: Some(e.to_string()),
                    }))?;
                }
            }
        }
        ForwardType::Remote => {
            let listener = TcpListener::bind(("0.0.0.0", source_port)).await?;
            let registry = registry.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                loop {
                    let (stream, _addr) = match listener.accept().await {
                        Ok(pair) => pair,
                        Err(_) => break,
                    };
                    let inbound_id = uuid::Uuid::new_v4().to_string();
                    let (data_tx, task) =
                        spawn_relay(registry.clone(), queue.clone(), inbound_id.clone(), stream);
                    registry.insert(inbound_id.clone(), data_tx, task).await;
                    let _ = queue.send(Message::PortForwardAccept(PortForwardAccept {
                        connection_id: inbound_id,
                        success: true,
                        error_message: None,
                    }));
                }
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender;

    #[tokio::test]
    async fn local_forward_relays_bytes_both_ways() {
        let echo_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo_listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let (client_io, mut server_io) = tokio::io::duplex(65536);
        let (queue, _writer_task) = sender::spawn(client_io);
        let registry = ForwardRegistry::new();

        handle_request(
            &registry,
            &queue,
            ForwardType::Local,
            0,
            "127.0.0.1".to_string(),
            echo_addr.port(),
            "c1".to_string(),
        )
        .await
        .unwrap();

        let (tag, _seq, _payload) = crate::frame::read_handshake_frame(&mut server_io)
            .await
            .unwrap();
        assert_eq!(tag, 19); // PORT_FORWARD_ACCEPT

        registry.forward_data("c1", b"ping".to_vec()).await;

        let (tag, _seq, payload) = crate::frame::read_handshake_frame(&mut server_io)
            .await
            .unwrap();
        assert_eq!(tag, 20); // PORT_FORWARD_DATA
        let decoded = Message::decode(tag, &payload).unwrap();
        match decoded {
            Message::PortForwardData(d) => assert_eq!(d.data, b"ping"),
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn local_forward_to_closed_port_reports_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (client_io, mut server_io) = tokio::io::duplex(65536);
        let (queue, _writer_task) = sender::spawn(client_io);
        let registry = ForwardRegistry::new();

        handle_request(
            &registry,
            &queue,
            ForwardType::Local,
            0,
            "127.0.0.1".to_string(),
            addr.port(),
            "c2".to_string(),
        )
        .await
        .unwrap();

        let (tag, _seq, payload) = crate::frame::read_handshake_frame(&mut server_io)
            .await
            .unwrap();
        assert_eq!(tag, 19);
        match Message::decode(tag, &payload).unwrap() {
            Message::PortForwardAccept(a) => assert!(!a.success),
            _ => panic!("wrong variant"),
        }
    }
}
