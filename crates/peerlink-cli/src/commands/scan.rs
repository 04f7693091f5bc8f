//! Scan command implementation.

use anyhow::{Context, Result};

use peerlink_core::config::Config;
use peerlink_core::discovery::discover_peers;
use peerlink_core::PeerAddress;

use super::ScanArgs;
use crate::ui::{parse_duration, rule};

/// Run the scan command.
pub async fn run(args: ScanArgs, config: Config) -> Result<()> {
    let mut discovery = config.discovery_config();

    if let Some(timeout) = &args.timeout {
        discovery.timeout = parse_duration(timeout)
            .context("Invalid duration format. Use formats like '3s', '10s', '500ms'")?;
    }

    if !args.json {
        println!();
        println!(
            "Scanning for peers ({:.1}s on UDP {})...",
            discovery.timeout.as_secs_f64(),
            discovery.port
        );
        println!();
    }

    let peers = discover_peers(&discovery)
        .await
        .context("Discovery failed")?;

    if args.json {
        output_json_peers(&peers)?;
    } else {
        display_peers(&peers);
    }

    Ok(())
}

/// Output peers as JSON.
fn output_json_peers(peers: &[PeerAddress]) -> Result<()> {
    let output = serde_json::json!({
        "peers": peers.iter().map(|p| serde_json::json!({
            "host": p.host,
            "port": p.port,
            "address": p.to_string(),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Display peers as a text table.
fn display_peers(peers: &[PeerAddress]) {
    println!("Peers on Network:");
    println!("{}", rule());
    println!("  {:40}  {:6}", "Host", "Port");
    println!("{}", rule());

    if peers.is_empty() {
        println!("  (no peers found)");
    }

    for peer in peers {
        println!("  {:40}  {:6}", peer.host, peer.port);
    }

    println!("{}", rule());
}
