//! Duplicates command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use mediaquiz_core::DuplicateDetector;
use tracing::debug;

use crate::utils::load_hashes;

/// Group near-identical images listed in a hash manifest.
pub async fn execute(hashes: PathBuf, distance: Option<u32>, json: bool) -> Result<()> {
    let entries = load_hashes(&hashes)?;
    debug!(entries = entries.len(), "Loaded hash manifest");

    let detector = distance.map(DuplicateDetector::new).unwrap_or_default();
    let groups = tokio::task::spawn_blocking(move || detector.find_duplicate_groups(&entries))
        .await
        .context("Duplicate search panicked")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    if groups.is_empty() {
        println!("{}", "No duplicates found".green());
        return Ok(());
    }

    println!("{} {} group(s)", "Found".yellow().bold(), groups.len());
    for group in &groups {
        println!();
        println!("   {}", group.anchor.bold());
        for member in &group.members {
            println!(
                "     {} {} {}",
                "~".dimmed(),
                member.path,
                format!("(distance {})", member.distance).dimmed()
            );
        }
    }
    Ok(())
}
