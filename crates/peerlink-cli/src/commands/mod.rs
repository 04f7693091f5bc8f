//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use peerlink_core::config::Config;
use peerlink_core::PeerAddress;

pub mod catalog;
pub mod exchange;
pub mod get;
pub mod scan;
pub mod serve;

/// Load configuration from `path`, or from the default location.
///
/// A missing file yields the defaults; a malformed or invalid one is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// PeerLink - peer-to-peer file exchange on the local network
#[derive(Parser)]
#[command(name = "peerlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, env = "PEERLINK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Serve a shared folder and answer discovery requests
    Serve(ServeArgs),

    /// Find peers on the local network
    Scan(ScanArgs),

    /// Check that a peer answers
    Ping(PeerArgs),

    /// Greet a peer
    Hello(HelloArgs),

    /// Show a peer's port, status and file count
    Info(PeerArgs),

    /// List a peer's shared files
    List(ListArgs),

    /// Download and verify a file from a peer
    Get(GetArgs),

    /// Hash a directory into a catalog file
    Catalog(CatalogArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Listening port (TCP)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Folder to share
    #[arg(short, long)]
    pub shared_dir: Option<PathBuf>,

    /// Catalog file merged with the scanned shared folder
    #[arg(short, long)]
    pub catalog: Option<PathBuf>,

    /// Do not answer discovery requests
    #[arg(long)]
    pub no_discovery: bool,
}

/// Arguments for the scan command
#[derive(Parser)]
pub struct ScanArgs {
    /// How long to collect replies (e.g., 3s, 10s)
    #[arg(short, long)]
    pub timeout: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments shared by single-exchange commands
#[derive(Parser)]
pub struct PeerArgs {
    /// Peer address (host, host:port, [v6]:port)
    #[arg(value_parser = parse_peer)]
    pub peer: PeerAddress,
}

/// Arguments for the hello command
#[derive(Parser)]
pub struct HelloArgs {
    /// Peer address
    #[arg(value_parser = parse_peer)]
    pub peer: PeerAddress,

    /// Name to introduce yourself with (defaults to client.peer_name)
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Arguments for the list command
#[derive(Parser)]
pub struct ListArgs {
    /// Peer address
    #[arg(value_parser = parse_peer)]
    pub peer: PeerAddress,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the get command
#[derive(Parser)]
pub struct GetArgs {
    /// Peer address
    #[arg(value_parser = parse_peer)]
    pub peer: PeerAddress,

    /// Name of the file to download
    pub file_name: String,

    /// Output directory (defaults to client.download_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Catalog file holding the expected hash
    #[arg(short, long)]
    pub catalog: Option<PathBuf>,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the catalog command
#[derive(Parser)]
pub struct CatalogArgs {
    /// Directory to hash
    pub dir: PathBuf,

    /// Catalog file to write (defaults to catalog.path)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Replace the catalog instead of merging into it
    #[arg(long)]
    pub replace: bool,
}

fn parse_peer(s: &str) -> std::result::Result<PeerAddress, String> {
    PeerAddress::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get() {
        let cli = Cli::try_parse_from([
            "peerlink",
            "get",
            "192.168.1.20:9000",
            "report.pdf",
            "--output",
            "in",
        ])
        .unwrap();

        let Command::Get(args) = cli.command else {
            panic!("expected get");
        };
        assert_eq!(args.peer, PeerAddress::new("192.168.1.20", 9000));
        assert_eq!(args.file_name, "report.pdf");
        assert_eq!(args.output, Some(PathBuf::from("in")));
        assert!(args.catalog.is_none());
    }

    #[test]
    fn test_parse_peer_default_port() {
        let cli = Cli::try_parse_from(["peerlink", "ping", "10.0.0.5"]).unwrap();
        let Command::Ping(args) = cli.command else {
            panic!("expected ping");
        };
        assert_eq!(args.peer.port, peerlink_core::DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_rejects_bad_peer() {
        assert!(Cli::try_parse_from(["peerlink", "info", "host:notaport"]).is_err());
    }

    #[test]
    fn test_global_verbose() {
        let cli = Cli::try_parse_from(["peerlink", "scan", "--json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Scan(ScanArgs { json: true, .. })));
    }
}
