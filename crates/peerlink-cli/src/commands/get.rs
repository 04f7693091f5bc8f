//! Get command implementation.

use anyhow::{Context, Result};

use peerlink_core::catalog::CatalogStore;
use peerlink_core::client::Downloader;
use peerlink_core::config::Config;
use peerlink_core::file::{destination_path, format_size};

use super::GetArgs;
use crate::ui::{display_progress, format_rate};

/// Run the get command.
pub async fn run(args: GetArgs, config: Config) -> Result<()> {
    let catalog_path = args
        .catalog
        .or_else(|| config.catalog_path())
        .context("No catalog file configured; pass --catalog")?;
    let store = CatalogStore::load_from(catalog_path.clone())
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
    let catalog = store.to_memory();

    let output_dir = args.output.unwrap_or(config.client.download_dir);
    let dest = destination_path(&output_dir, &args.file_name)
        .with_context(|| format!("Cannot save '{}'", args.file_name))?;

    if !args.quiet {
        println!();
        println!("Downloading {} from {}", args.file_name, args.peer);
        println!("  -> {}", dest.display());
        println!();
    }

    let downloader = Downloader::new(config.network.connect_timeout);
    let progress_handle =
        (!args.quiet).then(|| tokio::spawn(display_progress(downloader.progress())));

    let result = downloader
        .download(&args.peer, &args.file_name, &dest, &catalog)
        .await;

    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let report = result.with_context(|| {
        format!("Failed to download '{}' from {}", args.file_name, args.peer)
    })?;

    if !args.quiet {
        println!();
        println!(
            "  Verified {} ({}, {}) in {:.1}s",
            report.path.display(),
            format_size(report.bytes),
            format_rate(report.bytes, report.elapsed),
            report.elapsed.as_secs_f64()
        );
        println!("  SHA-256: {}", report.hash);
    }

    Ok(())
}
