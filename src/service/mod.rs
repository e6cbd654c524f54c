//! The SERVICE-phase dispatch loop (spec §4.5): routes each decoded
//! message to its handler. This module is written from the server's
//! perspective — it is the side that executes commands, serves files, and
//! opens forwarded connections; the client drives the same wire protocol
//! directly in [`crate::client`] since its side of each exchange is a
//! simple request/response rather than a dispatch table.
pub mod files;
pub mod forward;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};

use crate::errors::Result;
use crate::executor::CommandExecutor;
use crate::message::{Message, ServiceAccept};
use crate::providers::UserStore;
use crate::sender::OutgoingQueue;
use files::UploadGuard;
use forward::ForwardRegistry;

/// Repeated unexpected messages close the session (spec §4.5: "repeated
/// unexpected tags may terminate the session").
const MAX_UNEXPECTED_MESSAGES: u32 = 5;

pub struct ServiceContext {
    pub queue: OutgoingQueue,
    pub username: String,
    pub files_root: PathBuf,
    pub user_store: Arc<dyn UserStore>,
    pub executor: Box<dyn CommandExecutor>,
    pub upload_guard: UploadGuard,
    pub forwards: ForwardRegistry,
    unexpected_count: u32,
}

impl ServiceContext {
    pub fn new(
        queue: OutgoingQueue,
        username: String,
        files_root: PathBuf,
        user_store: Arc<dyn UserStore>,
        executor: Box<dyn CommandExecutor>,
        upload_guard: UploadGuard,
    ) -> Self {
        Self {
            queue,
            username,
            files_root,
            user_store,
            executor,
            upload_guard,
            forwards: ForwardRegistry::new(),
            unexpected_count: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    Disconnect,
}

/// Dispatches one SERVICE-phase message. `reader`/`aes_key`/`hmac_key`/
/// `recv_seq` are only needed for FILE_UPLOAD_REQUEST, which must keep
/// reading frames itself until the upload's last chunk.
pub async fn dispatch<R>(
    ctx: &mut ServiceContext,
    reader: &mut R,
    message: Message,
    aes_key: &[u8; 32],
    hmac_key: &[u8; 32],
    recv_seq: &mut u32,
) -> Result<DispatchOutcome>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match message {
        Message::ServiceRequest(req) => {
            ctx.queue.send(Message::ServiceAccept(ServiceAccept {
                service: req.service,
            }))?;
            Ok(DispatchOutcome::Continue)
        }
        Message::ShellCommand(cmd) => {
            shell::handle_command(
                ctx.executor.as_mut(),
                &ctx.queue,
                &cmd.command,
                &cmd.working_directory,
            )?;
            Ok(DispatchOutcome::Continue)
        }
        Message::FileUploadRequest(req) => {
            files::handle_upload(
                reader,
                &ctx.queue,
                &ctx.upload_guard,
                &ctx.files_root,
                &ctx.username,
                &req.target_path,
                aes_key,
                hmac_key,
                recv_seq,
            )
            .await?;
            Ok(DispatchOutcome::Continue)
        }
        Message::FileDownloadRequest(req) => {
            files::handle_download(
                reader,
                &ctx.queue,
                &ctx.files_root,
                &ctx.username,
                &req.filename,
                aes_key,
                hmac_key,
                recv_seq,
            )
            .await?;
            Ok(DispatchOutcome::Continue)
        }
        Message::Disconnect => {
            info!("session for {} received DISCONNECT", ctx.username);
            Ok(DispatchOutcome::Disconnect)
        }
        Message::ReloadUsers => {
            match ctx.user_store.reload() {
                Ok(()) => ctx.queue.send(Message::ServiceAccept(ServiceAccept {
                    service: "reload_users".to_string(),
                }))?,
                Err(e) => ctx.queue.send(Message::error("RELOAD_FAILED", e.to_string()))?,
            }
            Ok(DispatchOutcome::Continue)
        }
        Message::PortForwardRequest(req) => {
            forward::handle_request(
                &ctx.forwards,
                &ctx.queue,
                req.forward_type,
                req.source_port,
                req.dest_host,
                req.dest_port,
                req.connection_id,
            )
            .await?;
            Ok(DispatchOutcome::Continue)
        }
        Message::PortForwardData(data) => {
            ctx.forwards.forward_data(&data.connection_id, data.data).await;
            Ok(DispatchOutcome::Continue)
        }
        Message::PortForwardClose(close) => {
            ctx.forwards.close(&close.connection_id).await;
            Ok(DispatchOutcome::Continue)
        }
        Message::Error(e) => {
            warn!("peer reported error {}: {}", e.error_code, e.error_message);
            Ok(DispatchOutcome::Continue)
        }
        other => {
            ctx.unexpected_count += 1;
            ctx.queue.send(Message::error(
                "UNEXPECTED_MESSAGE",
                format!("{} is not valid in the service loop", other.name()),
            ))?;
            if ctx.unexpected_count >= MAX_UNEXPECTED_MESSAGES {
                Ok(DispatchOutcome::Disconnect)
            } else {
                Ok(DispatchOutcome::Continue)
            }
        }
    }
}
