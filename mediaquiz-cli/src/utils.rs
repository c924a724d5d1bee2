//! Common utility functions shared across CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use mediaquiz_core::index::parse_manifest;
use mediaquiz_core::{MediaConfig, MediaError, PerceptualHash, RepositoryHandle};
use tracing_subscriber::EnvFilter;

use crate::RepoKind;

/// Install a stderr subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose {
        "mediaquiz=debug,mediaquiz_core=debug"
    } else {
        "mediaquiz=warn,mediaquiz_core=warn"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn load_config() -> Result<MediaConfig> {
    MediaConfig::from_env().context("Failed to load configuration from environment")
}

pub fn repository(kind: RepoKind, config: &MediaConfig) -> RepositoryHandle {
    match kind {
        RepoKind::Cache => RepositoryHandle::for_cache(config),
        RepoKind::Canonical => RepositoryHandle::for_canonical(config),
        RepoKind::Staging => RepositoryHandle::for_staging(config),
    }
}

/// Read a `path,perceptualHashHex` manifest from disk.
pub fn load_hashes(path: &Path) -> Result<Vec<(String, PerceptualHash)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read hashes file: {}", path.display()))?;
    parse_hashes(&text).with_context(|| format!("Invalid hashes file: {}", path.display()))
}

fn parse_hashes(text: &str) -> mediaquiz_core::Result<Vec<(String, PerceptualHash)>> {
    parse_manifest(text)?
        .into_iter()
        .enumerate()
        .map(|(i, (path, hex))| {
            let hash = PerceptualHash::from_hex(&hex).map_err(|e| MediaError::ManifestParse {
                line: i + 1,
                reason: e.to_string(),
            })?;
            Ok((path, hash))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hashes() {
        let text = "./birds/robin/a.png,ffff0000ffff0000\nbirds/wren/b.png,0000ffff0000ffff\n";
        let rows = parse_hashes(text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "birds/robin/a.png");
        assert_eq!(rows[1].1.to_hex(), "0000ffff0000ffff");
    }

    #[test]
    fn test_parse_hashes_rejects_bad_hex() {
        let err = parse_hashes("birds/robin/a.png,not-hex\n").unwrap_err();
        assert!(matches!(err, MediaError::ManifestParse { line: 1, .. }));
    }
}
