//! Single-exchange commands: ping, hello, info and list.

use std::time::Instant;

use anyhow::{bail, Context, Result};

use peerlink_core::client::PeerClient;
use peerlink_core::config::Config;
use peerlink_core::PeerAddress;

use super::{HelloArgs, ListArgs, PeerArgs};
use crate::ui::rule;

async fn connect(peer: &PeerAddress, config: &Config) -> Result<PeerClient> {
    PeerClient::connect(peer, config.network.connect_timeout)
        .await
        .with_context(|| format!("Failed to connect to {peer}"))
}

/// Run the ping command.
pub async fn ping(args: PeerArgs, config: Config) -> Result<()> {
    let started = Instant::now();
    let mut client = connect(&args.peer, &config).await?;

    let alive = client.ping().await.context("Ping failed")?;
    let elapsed = started.elapsed();
    client.disconnect().await.ok();

    if !alive {
        bail!("{} answered but not with PONG", args.peer);
    }

    println!("PONG from {} in {:.1} ms", args.peer, elapsed.as_secs_f64() * 1000.0);
    Ok(())
}

/// Run the hello command.
pub async fn hello(args: HelloArgs, config: Config) -> Result<()> {
    let name = args.name.unwrap_or_else(|| config.client.peer_name.clone());
    let mut client = connect(&args.peer, &config).await?;

    let greeting = client.hello(&name).await.context("Greeting failed")?;
    client.disconnect().await.ok();

    println!("{greeting}");
    Ok(())
}

/// Run the info command.
pub async fn info(args: PeerArgs, config: Config) -> Result<()> {
    let mut client = connect(&args.peer, &config).await?;

    let info = client.server_info().await.context("Info request failed")?;
    client.disconnect().await.ok();

    println!();
    println!("Peer {}", args.peer);
    println!("{}", rule());
    println!("  Port:    {}", info.port);
    println!("  Status:  {}", info.status);
    println!("  Files:   {}", info.files);
    println!("{}", rule());
    Ok(())
}

/// Run the list command.
pub async fn list(args: ListArgs, config: Config) -> Result<()> {
    let mut client = connect(&args.peer, &config).await?;

    let files = client.list_files().await.context("List request failed")?;
    client.disconnect().await.ok();

    if args.json {
        let output = serde_json::json!({
            "peer": args.peer.to_string(),
            "files": files,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("Files shared by {}:", args.peer);
    println!("{}", rule());
    if files.is_empty() {
        println!("  (no files)");
    }
    for file in &files {
        println!("  {file}");
    }
    println!("{}", rule());
    Ok(())
}
