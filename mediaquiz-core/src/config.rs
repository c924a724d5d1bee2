//! Pipeline configuration.
//!
//! A single [`MediaConfig`] value is built at startup (from the environment or
//! by hand in tests) and handed to each component's constructor.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MediaError, Result};

/// Default byte ceiling for served and uploaded images (4 MB).
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 4_000_000;

/// Default number of votes needed to promote or reject a staged image.
pub const DEFAULT_VOTE_THRESHOLD: u32 = 3;

/// Default Hamming distance for near-duplicate detection.
pub const DEFAULT_DUPLICATE_DISTANCE: u32 = 5;

/// Whether a manifest source describes the published or the pending collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Canonical,
    Staging,
}

/// One remote publishing an identity manifest and a perceptual hash manifest.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    /// Short label used in logs
    pub label: String,
    /// URL of the `path,contentHashHex` manifest
    pub ids_url: String,
    /// URL of the `path,perceptualHashHex` manifest
    pub hashes_url: String,
    pub kind: SourceKind,
}

/// Commit identity and optional credentials for pushing repositories.
#[derive(Clone, Default)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
    /// Username for HTTPS authentication
    pub username: Option<String>,
    /// Token or password for HTTPS authentication
    pub token: Option<String>,
}

impl std::fmt::Debug for GitIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitIdentity")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Explicit configuration for every pipeline component.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Remote URL of the canonical image collection
    pub canonical_repo_url: String,
    /// Working copy used for promotion (full history, pushable)
    pub canonical_dir: PathBuf,
    /// Read-only shallow working copy serving quiz images
    pub cache_dir: PathBuf,
    /// Remote URL of the staging (verification) collection
    pub staging_repo_url: String,
    /// Working copy of the staging collection
    pub staging_dir: PathBuf,
    /// Subdirectory of the staging working copy holding pending images
    pub staging_subdir: String,
    /// Per-submitter temporary upload area
    pub upload_dir: PathBuf,
    /// Directory with one `{category}.txt` item list per category
    pub catalog_dir: PathBuf,
    /// Manifest sources merged into the content identity index
    pub manifest_sources: Vec<ManifestSource>,
    /// Base URL prepended to manifest paths when reporting duplicates
    pub base_image_url: String,
    /// Commit URL templates (`{id}` placeholder) for canonical then staging
    pub commit_url_formats: [String; 2],
    pub git_identity: GitIdentity,

    /// File extensions eligible for serving
    pub allowed_extensions: Vec<String>,
    /// MIME types accepted for uploads
    pub allowed_mime_types: Vec<String>,
    pub max_image_bytes: u64,
    pub max_files_per_upload: usize,
    pub duplicate_distance: u32,
    pub vote_threshold: u32,
    /// Sync attempts made when an item directory is missing or empty
    pub sync_retries: u32,
    /// Serve count above which an item becomes eligible for eviction
    pub eviction_threshold: u32,
    /// Maximum items evicted per sweep
    pub eviction_batch: usize,
    pub eviction_interval: Duration,
    pub cache_refresh_interval: Duration,
    pub promotion_interval: Duration,
    /// How long finished job records stay visible
    pub job_retention: Duration,
    pub lock_timeout: Duration,
    /// Lease recorded with each lock acquisition
    pub lock_lease: Duration,
    pub manifest_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            canonical_repo_url: String::new(),
            canonical_dir: PathBuf::from("data/canonical"),
            cache_dir: PathBuf::from("data/cache"),
            staging_repo_url: String::new(),
            staging_dir: PathBuf::from("data/staging"),
            staging_subdir: "images".to_string(),
            upload_dir: PathBuf::from("data/uploads"),
            catalog_dir: PathBuf::from("data/lists"),
            manifest_sources: Vec::new(),
            base_image_url: String::new(),
            commit_url_formats: [String::new(), String::new()],
            git_identity: GitIdentity {
                name: "mediaquiz".to_string(),
                email: "mediaquiz@localhost".to_string(),
                username: None,
                token: None,
            },
            allowed_extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_mime_types: vec!["image/jpeg".to_string(), "image/png".to_string()],
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_files_per_upload: 10,
            duplicate_distance: DEFAULT_DUPLICATE_DISTANCE,
            vote_threshold: DEFAULT_VOTE_THRESHOLD,
            sync_retries: 3,
            eviction_threshold: 10,
            eviction_batch: 3,
            eviction_interval: Duration::from_secs(60 * 60),
            cache_refresh_interval: Duration::from_secs(24 * 60 * 60),
            promotion_interval: Duration::from_secs(15 * 60),
            job_retention: Duration::from_secs(60),
            lock_timeout: Duration::from_secs(120),
            lock_lease: Duration::from_secs(300),
            manifest_timeout: Duration::from_secs(10),
        }
    }
}

impl MediaConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `CANONICAL_REPO_URL`, `STAGING_REPO_URL`.
    /// Manifest sources come from `CANONICAL_IDS_URL`/`CANONICAL_HASHES_URL`
    /// and `STAGING_IDS_URL`/`STAGING_HASHES_URL`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let canonical_repo_url = std::env::var("CANONICAL_REPO_URL")
            .map_err(|_| MediaError::Config("CANONICAL_REPO_URL not set".into()))?;
        let staging_repo_url = std::env::var("STAGING_REPO_URL")
            .map_err(|_| MediaError::Config("STAGING_REPO_URL not set".into()))?;

        let data_dir = env_path("MEDIA_DATA_DIR").unwrap_or_else(|| PathBuf::from("data"));

        let mut manifest_sources = Vec::new();
        if let (Ok(ids_url), Ok(hashes_url)) = (
            std::env::var("CANONICAL_IDS_URL"),
            std::env::var("CANONICAL_HASHES_URL"),
        ) {
            manifest_sources.push(ManifestSource {
                label: "canonical".to_string(),
                ids_url,
                hashes_url,
                kind: SourceKind::Canonical,
            });
        }
        if let (Ok(ids_url), Ok(hashes_url)) = (
            std::env::var("STAGING_IDS_URL"),
            std::env::var("STAGING_HASHES_URL"),
        ) {
            manifest_sources.push(ManifestSource {
                label: "staging".to_string(),
                ids_url,
                hashes_url,
                kind: SourceKind::Staging,
            });
        }

        let git_identity = GitIdentity {
            name: std::env::var("GIT_AUTHOR_NAME").unwrap_or(defaults.git_identity.name),
            email: std::env::var("GIT_AUTHOR_EMAIL").unwrap_or(defaults.git_identity.email),
            username: std::env::var("GIT_USERNAME").ok(),
            token: std::env::var("GIT_TOKEN").ok(),
        };

        Ok(Self {
            canonical_repo_url,
            canonical_dir: data_dir.join("canonical"),
            cache_dir: data_dir.join("cache"),
            staging_repo_url,
            staging_dir: data_dir.join("staging"),
            staging_subdir: std::env::var("STAGING_SUBDIR").unwrap_or(defaults.staging_subdir),
            upload_dir: env_path("UPLOAD_DIR").unwrap_or_else(|| data_dir.join("uploads")),
            catalog_dir: env_path("CATALOG_DIR").unwrap_or_else(|| data_dir.join("lists")),
            manifest_sources,
            base_image_url: std::env::var("BASE_IMAGE_URL").unwrap_or_default(),
            commit_url_formats: [
                std::env::var("CANONICAL_COMMIT_URL").unwrap_or_default(),
                std::env::var("STAGING_COMMIT_URL").unwrap_or_default(),
            ],
            git_identity,
            vote_threshold: env_parse("VOTE_THRESHOLD").unwrap_or(defaults.vote_threshold),
            duplicate_distance: env_parse("DUPLICATE_DISTANCE")
                .unwrap_or(defaults.duplicate_distance),
            promotion_interval: env_parse("PROMOTION_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.promotion_interval),
            lock_timeout: env_parse("LOCK_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
            ..defaults
        })
    }

    /// Absolute path of the pending-images directory inside the staging copy.
    pub fn staging_images_dir(&self) -> PathBuf {
        self.staging_dir.join(&self.staging_subdir)
    }

    /// Commit URL for the canonical (`index` 0) or staging (`index` 1) repository.
    pub fn commit_url(&self, index: usize, commit_id: &str) -> Option<String> {
        self.commit_url_formats
            .get(index)
            .filter(|f| !f.is_empty())
            .map(|f| f.replace("{id}", commit_id))
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = MediaConfig::default();
        assert_eq!(config.vote_threshold, 3);
        assert_eq!(config.duplicate_distance, 5);
        assert_eq!(config.max_image_bytes, 4_000_000);
        assert_eq!(config.sync_retries, 3);
        assert_eq!(config.eviction_batch, 3);
        assert_eq!(config.eviction_threshold, 10);
    }

    #[test]
    fn test_commit_url_template() {
        let config = MediaConfig {
            commit_url_formats: [
                "https://example.org/images/commit/{id}".to_string(),
                String::new(),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.commit_url(0, "abc123").as_deref(),
            Some("https://example.org/images/commit/abc123")
        );
        assert_eq!(config.commit_url(1, "abc123"), None);
        assert_eq!(config.commit_url(2, "abc123"), None);
    }

    #[test]
    fn test_identity_debug_redacts_token() {
        let identity = GitIdentity {
            name: "bot".into(),
            email: "bot@example.org".into(),
            username: Some("bot".into()),
            token: Some("hunter2".into()),
        };
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
