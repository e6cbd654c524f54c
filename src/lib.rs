//! `vantage-core`: the secure session layer for a custom remote-access
//! system — framing, Diffie-Hellman key agreement, server authentication
//! by signature, AES-256-GCM + HMAC record security, password/public-key/
//! dual authentication, and the post-authentication service loop (shell
//! execution, file transfer, port forwarding).
//!
//! Command-line parsing, on-disk credential file formats beyond what
//! [`providers`] needs to stay runnable, user-facing shells/TUIs, log
//! rotation, and key-pair generation tooling are external collaborators;
//! this crate defines the traits they must satisfy ([`providers::UserStore`],
//! [`providers::ServerIdentity`], [`providers::ClientIdentity`],
//! [`executor::CommandExecutor`]) and ships filesystem-backed reference
//! implementations of each so the crate is runnable end to end on its own.

pub mod auth;
pub mod client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod executor;
pub mod frame;
pub mod known_hosts;
pub mod message;
pub mod providers;
pub mod sender;
pub mod server;
pub mod service;
pub mod session;

pub use client::Client;
pub use errors::{Error, ErrorKind, Result};
pub use server::SessionSupervisor;
