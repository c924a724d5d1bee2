//! Sync command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use crate::utils::{load_config, repository};
use crate::RepoKind;

/// Clone or update one working copy, with the same retry budget the cache uses.
pub async fn execute(kind: RepoKind) -> Result<()> {
    let config = load_config()?;
    let repo = repository(kind, &config);
    let attempts = config.sync_retries.max(1);

    let mut last_err = None;
    for attempt in 1..=attempts {
        match repo.sync().await {
            Ok(()) => {
                last_err = None;
                break;
            }
            Err(e) => {
                info!(repo = repo.name(), attempt, error = %e, "Sync attempt failed");
                last_err = Some(e);
            }
        }
    }
    if let Some(e) = last_err {
        return Err(e).with_context(|| format!("Sync of {} failed after {attempts} attempts", repo.name()));
    }

    println!(
        "{} {} {}",
        "Synced".green().bold(),
        repo.name(),
        repo.dir().display().to_string().dimmed()
    );
    Ok(())
}
