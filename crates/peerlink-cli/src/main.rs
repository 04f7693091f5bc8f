//! PeerLink CLI - peer-to-peer file exchange on the local network
//!
//! Every peer can serve a shared folder and download from other peers.
//! Downloads are verified against a local catalog of SHA-256 hashes.
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve ./shared_files on port 8000 and answer discovery
//! peerlink serve
//!
//! # Find peers (on another device)
//! peerlink scan
//!
//! # Download a file
//! peerlink get 192.168.1.20:8000 report.pdf
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;
pub mod ui;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve(args) => commands::serve::run(args, config).await,
        Command::Scan(args) => commands::scan::run(args, config).await,
        Command::Ping(args) => commands::exchange::ping(args, config).await,
        Command::Hello(args) => commands::exchange::hello(args, config).await,
        Command::Info(args) => commands::exchange::info(args, config).await,
        Command::List(args) => commands::exchange::list(args, config).await,
        Command::Get(args) => commands::get::run(args, config).await,
        Command::Catalog(args) => commands::catalog::run(args, config).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose {
        "info,peerlink=debug,peerlink_core=debug"
    } else {
        "warn,peerlink=info,peerlink_core=info"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
