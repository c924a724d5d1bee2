//! Promote command implementation.
//!
//! Operator decisions are final: each id gets a single vote and the vote
//! threshold is lowered to one for this run.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use mediaquiz_core::promotion::staging_manifest;
use mediaquiz_core::{
    Decision, ItemCatalog, LogNotifier, MediaError, PromotionTask, RepositoryHandle,
    VerificationTally,
};

use crate::utils::load_config;

const OPERATOR: &str = "operator";

pub async fn execute(accept: Vec<String>, reject: Vec<String>) -> Result<()> {
    let overlap: BTreeSet<&String> = accept.iter().filter(|id| reject.contains(id)).collect();
    if !overlap.is_empty() {
        bail!("Ids both accepted and rejected: {:?}", overlap);
    }

    let mut config = load_config()?;
    config.vote_threshold = 1;

    let catalog = Arc::new(
        ItemCatalog::load(&config.catalog_dir)
            .with_context(|| format!("Failed to read catalog: {}", config.catalog_dir.display()))?,
    );
    let canonical = Arc::new(RepositoryHandle::for_canonical(&config));
    let staging = Arc::new(RepositoryHandle::for_staging(&config));

    staging.sync().await.context("Failed to sync staging collection")?;
    let staged = staging_manifest(&staging, &config.staging_subdir).await?;
    let missing: Vec<&String> = accept
        .iter()
        .chain(reject.iter())
        .filter(|id| !staged.contains_key(*id))
        .collect();
    if !missing.is_empty() {
        return Err(MediaError::UnknownImage(
            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
        ))
        .context("Not in the staging collection");
    }

    let tally = Arc::new(VerificationTally::new());
    for id in &accept {
        tally.vote(id, OPERATOR, Decision::Valid)?;
    }
    for id in &reject {
        tally.vote(id, OPERATOR, Decision::Invalid)?;
    }

    let task = PromotionTask::new(
        &config,
        canonical,
        staging,
        catalog,
        tally,
        Arc::new(LogNotifier),
    );
    let report = task.run_once().await?;

    if let Some(repo) = report.failed.first() {
        return Err(MediaError::PushFailure { repo: repo.clone() }).context("Promotion not published");
    }

    println!(
        "{} {} added, {} removed",
        "Promoted".green().bold(),
        report.added,
        report.rejected
    );
    if !report.items.is_empty() {
        println!("   {} {}", "items:".dimmed(), report.items.join(", "));
    }
    for url in &report.urls {
        println!("   {} {}", "commit:".dimmed(), url);
    }
    if report.added < accept.len() {
        println!(
            "   {} {} accepted image(s) left staged (item has no category)",
            "warning:".yellow(),
            accept.len() - report.added
        );
    }
    Ok(())
}
