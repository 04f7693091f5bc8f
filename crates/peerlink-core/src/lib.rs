//! # PeerLink Core Library
//!
//! `peerlink-core` provides the core functionality for PeerLink, a
//! peer-to-peer file exchange tool for trusted local networks.
//!
//! ## Features
//!
//! - **Line protocol**: A small text protocol (`PING`, `LIST_FILES`,
//!   `DOWNLOAD_REQUEST`, ...) with raw byte payloads
//! - **Verified downloads**: Received files are checked against the SHA-256
//!   hash recorded in the local file catalog
//! - **LAN discovery**: UDP broadcast finds other peers on the network
//! - **Bounded serving**: Each listener serves a fixed number of connections
//!   concurrently
//!
//! ## Modules
//!
//! - [`catalog`] - File catalog lookups, JSON store and directory scanning
//! - [`client`] - Outbound exchanges and verified downloads
//! - [`config`] - Configuration management
//! - [`discovery`] - UDP broadcast peer discovery
//! - [`mod@file`] - Shared folder helpers
//! - [`hash`] - SHA-256 content hashing
//! - [`peer`] - Peer addresses
//! - [`protocol`] - Line protocol codec
//! - [`server`] - Peer listener and per-connection handler
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use peerlink_core::{catalog::MemoryCatalog, client, config::ServerConfig, server::PeerListener};
//!
//! let catalog = Arc::new(MemoryCatalog::new());
//! let listener = PeerListener::start(ServerConfig::default(), catalog.clone()).await?;
//!
//! // On another peer
//! let peer = "192.168.1.20:8000".parse()?;
//! client::download(&peer, "notes.txt", "downloads/notes.txt", catalog.as_ref(), timeout).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

use std::time::Duration;

pub mod catalog;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod file;
pub mod hash;
pub mod peer;
pub mod protocol;
pub mod server;

pub use error::{Error, Result};
pub use peer::PeerAddress;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port of the peer listener
pub const DEFAULT_LISTEN_PORT: u16 = 8000;

/// Default discovery port (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Default number of connections served concurrently
pub const DEFAULT_WORKER_POOL_SIZE: usize = 10;

/// Default outbound connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default discovery reply window
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time a stopping listener waits for in-flight connections
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
