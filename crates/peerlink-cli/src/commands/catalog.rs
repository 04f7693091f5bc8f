//! Catalog command implementation.

use anyhow::{Context, Result};

use peerlink_core::catalog::{scan_directory, CatalogStore};
use peerlink_core::config::Config;
use peerlink_core::file::format_size;

use super::CatalogArgs;
use crate::ui::rule;

/// Run the catalog command.
pub async fn run(args: CatalogArgs, config: Config) -> Result<()> {
    let output = args
        .output
        .or_else(|| config.catalog_path())
        .context("No catalog location available; pass --output")?;

    let dir = args.dir.clone();
    let entries = tokio::task::spawn_blocking(move || scan_directory(&dir))
        .await
        .context("Catalog scan task failed")?
        .with_context(|| format!("Failed to scan {}", args.dir.display()))?;

    let mut store = if args.replace {
        CatalogStore::new(output.clone())
    } else {
        CatalogStore::load_from(output.clone())
            .with_context(|| format!("Failed to load catalog {}", output.display()))?
    };

    println!();
    println!("{}", rule());
    for entry in &entries {
        let short_hash = entry.hash.get(..12).unwrap_or(&entry.hash);
        println!(
            "  {:40}  {:>10}  {}",
            entry.name,
            format_size(entry.size),
            short_hash
        );
    }
    println!("{}", rule());

    let added = entries.len();
    store.merge(entries);
    store
        .save()
        .with_context(|| format!("Failed to write catalog {}", output.display()))?;

    println!(
        "  Hashed {} files; catalog {} now holds {} entries.",
        added,
        output.display(),
        store.entries().len()
    );
    Ok(())
}
