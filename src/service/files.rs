//! File transfer (spec §4.5): per-user root confinement, chunked upload
//! via a run of FILE_DATA messages terminated by `isLast`, and chunked
//! download in fixed 8 KiB pieces.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::errors::{Error, Result};
use crate::frame;
use crate::message::{FileAck, FileData, Message};
use crate::sender::OutgoingQueue;

const DOWNLOAD_CHUNK_SIZE: usize = 8 * 1024;

/// Server-wide guard against two concurrent uploads to the same resolved
/// path (spec §5): shared across all sessions, not just one.
#[derive(Clone, Default)]
pub struct UploadGuard {
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl UploadGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, path: &Path) -> bool {
        self.in_flight.lock().unwrap().insert(path.to_path_buf())
    }

    fn release(&self, path: &Path) {
        self.in_flight.lock().unwrap().remove(path);
    }
}

/// Resolves `requested` under `<files_root>/<username>/`, rejecting any
/// path that would escape that root (spec §3, §8). The target need not
/// exist yet (uploads create it), so this does lexical normalization
/// rather than `fs::canonicalize`.
pub fn resolve_user_path(files_root: &Path, username: &str, requested: &str) -> Result<PathBuf> {
    let user_root = files_root.join(username);
    let mut normalized = PathBuf::new();
    for component in Path::new(requested).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(Error::Permission(requested.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Permission(requested.to_string()));
            }
        }
    }
    Ok(user_root.join(normalized))
}

/// Handles FILE_UPLOAD_REQUEST: acks readiness, then reads secure frames
/// directly off `reader` (bypassing the normal dispatch loop, since the
/// only valid next messages are FILE_DATA) until `isLast`.
pub async fn handle_upload<R>(
    reader: &mut R,
    queue: &OutgoingQueue,
    guard: &UploadGuard,
    files_root: &Path,
    username: &str,
    target_path: &str,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let resolved = resolve_user_path(files_root, username, target_path)?;
    if !guard.acquire(&resolved) {
        queue.send(Message::error(
            "UPLOAD_IN_PROGRESS",
            "another upload to this path is already in progress",
        ))?;
        return Ok(());
    }
    let result = do_upload(reader, queue, &resolved, aes_key, hmac_key, recv_seq).await;
    guard.release(&resolved);
    if let Err(e) = &result {
        queue.send(Message::error("UPLOAD_FAILED", e.to_string()))?;
    }
    result
}

async fn do_upload<R>(
    reader: &mut R,
    queue: &OutgoingQueue,
    resolved: &Path,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(resolved).await?;
    queue.send(Message::FileAck(FileAck {
        sequence_number: 0,
        status: "ready".to_string(),
        message: String::new(),
    }))?;

    loop {
        let (tag, seq, payload) = frame::read_secure_frame(reader, aes_key, hmac_key).await?;
        if seq != *recv_seq {
            return Err(Error::Replay {
                expected: *recv_seq,
                got: seq,
            });
        }
        *recv_seq = recv_seq.wrapping_add(1);
        let chunk = match Message::decode(tag, &payload)? {
            Message::FileData(data) => data,
            _ => {
                return Err(Error::Protocol {
                    phase: "SERVICE",
                    detail: "expected FILE_DATA during upload".to_string(),
                })
            }
        };
        file.write_all(&chunk.data).await?;
        if chunk.is_last {
            break;
        }
    }
    file.flush().await?;
    queue.send(Message::FileAck(FileAck {
        sequence_number: 0,
        status: "completed".to_string(),
        message: String::new(),
    }))?;
    Ok(())
}

/// Handles FILE_DOWNLOAD_REQUEST: streams the resolved file in 8 KiB
/// FILE_DATA chunks, then blocks for exactly one FILE_ACK.
pub async fn handle_download<R>(
    reader: &mut R,
    queue: &OutgoingQueue,
    files_root: &Path,
    username: &str,
    filename: &str,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let resolved = resolve_user_path(files_root, username, filename)?;
    let mut file = match File::open(&resolved).await {
        Ok(f) => f,
        Err(e) => {
            queue.send(Message::error("NOT_FOUND", e.to_string()))?;
            return Ok(());
        }
    };
    let file_size = file.metadata().await?.len();

    let mut buf = vec![0u8; DOWNLOAD_CHUNK_SIZE];
    let mut first = true;
    loop {
        // `AsyncRead::read` may return fewer bytes than the buffer even
        // before EOF, so fill the chunk in a loop and only call it the
        // last chunk once a read actually returns 0 (true EOF) rather
        // than inferring EOF from one short read.
        let mut filled = 0usize;
        let mut eof = false;
        while filled < DOWNLOAD_CHUNK_SIZE {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                eof = true;
                break;
            }
            filled += n;
        }
        queue.send(Message::FileData(FileData {
            filename: if first { Some(filename.to_string()) } else { None },
            file_size: if first { Some(file_size) } else { None },
            sequence_number: 0,
            data: buf[..filled].to_vec(),
            is_last: eof,
        }))?;
        first = false;
        if eof {
            break;
        }
    }

    let (tag, seq, payload) = frame::read_secure_frame(reader, aes_key, hmac_key).await?;
    if seq != *recv_seq {
        return Err(Error::Replay {
            expected: *recv_seq,
            got: seq,
        });
    }
    *recv_seq = recv_seq.wrapping_add(1);
    match Message::decode(tag, &payload)? {
        Message::FileAck(_) => Ok(()),
        _ => Err(Error::Protocol {
            phase: "SERVICE",
            detail: "expected FILE_ACK after download".to_string(),
        }),
    }
}
