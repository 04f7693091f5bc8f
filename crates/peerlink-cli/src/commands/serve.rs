//! Serve command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use peerlink_core::catalog::{scan_directory, CatalogStore, MemoryCatalog};
use peerlink_core::config::Config;
use peerlink_core::discovery::DiscoveryResponder;
use peerlink_core::file::{ensure_shared_dir, format_size};
use peerlink_core::server::PeerListener;

use super::ServeArgs;
use crate::ui::rule;

/// Run the serve command.
pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(port) = args.port {
        config.server.listen_port = port;
    }
    if let Some(dir) = args.shared_dir {
        config.server.shared_dir = dir;
    }
    config.validate().context("Invalid server settings")?;

    let shared_dir = config.server.shared_dir.clone();
    ensure_shared_dir(&shared_dir)
        .await
        .with_context(|| format!("Failed to prepare {}", shared_dir.display()))?;

    let catalog = build_catalog(shared_dir.clone(), args.catalog.or(config.catalog.path.clone()))
        .await?;
    let total: u64 = catalog.entries()?.iter().map(|e| e.size).sum();
    let file_count = catalog.len();

    let mut listener = PeerListener::start(config.server.clone(), Arc::new(catalog))
        .await
        .context("Failed to start peer listener")?;

    let responder = if args.no_discovery {
        None
    } else {
        Some(
            DiscoveryResponder::bind(config.network.discovery_port, listener.port())
                .await
                .context("Failed to start discovery responder")?,
        )
    };

    println!();
    println!("PeerLink v{}", peerlink_core::VERSION);
    println!("{}", rule());
    println!("  Listening:  {}", listener.local_addr());
    println!("  Sharing:    {}", shared_dir.display());
    println!("  Catalog:    {} files ({})", file_count, format_size(total));
    match &responder {
        Some(r) => println!("  Discovery:  UDP {}", r.local_addr().port()),
        None => println!("  Discovery:  off"),
    }
    println!("{}", rule());
    println!("  Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    if let Some(responder) = &responder {
        responder.stop().await;
    }
    let report = listener.stop().await;

    if report.aborted > 0 {
        println!(
            "  Closed {} connections, aborted {} still busy.",
            report.drained, report.aborted
        );
    } else {
        println!("  Closed {} connections.", report.drained);
    }

    Ok(())
}

/// Hash the shared folder and merge it over the catalog file, if any.
async fn build_catalog(shared_dir: PathBuf, catalog_file: Option<PathBuf>) -> Result<MemoryCatalog> {
    let scanned = tokio::task::spawn_blocking(move || scan_directory(&shared_dir))
        .await
        .context("Catalog scan task failed")?
        .context("Failed to scan shared folder")?;

    let mut store = match catalog_file {
        Some(path) => CatalogStore::load_from(&path)
            .with_context(|| format!("Failed to load catalog {}", path.display()))?,
        None => CatalogStore::new("catalog.json"),
    };

    tracing::debug!(
        "Merging {} scanned files into {} catalog entries",
        scanned.len(),
        store.entries().len()
    );
    store.merge(scanned);

    Ok(store.to_memory())
}
