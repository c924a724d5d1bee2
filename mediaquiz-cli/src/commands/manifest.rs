//! Manifest command implementation.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;

/// Scan a collection and write its identity and perceptual hash manifests.
pub async fn execute(root: PathBuf, out: Option<PathBuf>) -> Result<()> {
    if !root.is_dir() {
        bail!("Failed to read collection root: {} is not a directory", root.display());
    }
    let out_dir = out.unwrap_or_else(|| root.clone());

    let (ids, hashes, count) = tokio::task::spawn_blocking(move || {
        mediaquiz_core::manifest::write_manifests(&root, &out_dir)
    })
    .await
    .context("Manifest task panicked")?
    .context("Failed to write manifests")?;

    println!("{} {} images", "Indexed".green().bold(), count);
    println!("   {} {}", "ids:".dimmed(), ids.display());
    println!("   {} {}", "hashes:".dimmed(), hashes.display());
    Ok(())
}
