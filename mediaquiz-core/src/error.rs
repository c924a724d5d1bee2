use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No images found for {item}")]
    NoImagesFound { item: String },

    #[error("No valid images for {item} ({candidates} candidates rejected by type/size filters)")]
    NoValidImages { item: String, candidates: usize },

    #[error("Repository sync failed for {dir}: {reason}")]
    RepoSyncFailure { dir: PathBuf, reason: String },

    #[error("Content index unavailable: {url}: {reason}")]
    IndexUnavailable { url: String, reason: String },

    #[error("Manifest row {line} malformed: {reason}")]
    ManifestParse { line: usize, reason: String },

    #[error("Submitter {submitter} already voted on image {image_id}")]
    AlreadyVoted { image_id: String, submitter: String },

    #[error("A save job is already running for submitter {submitter}")]
    JobAlreadyRunning { submitter: String },

    #[error("Push to {repo} produced no confirmation from the remote")]
    PushFailure { repo: String },

    #[error("{count} change(s) to {repo} did not make it into a commit")]
    ChangesNotCommitted { repo: String, count: usize },

    #[error("Timed out after {waited:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Stale lease on {path}: token {token} is older than {latest}")]
    StaleLease {
        path: PathBuf,
        token: u64,
        latest: u64,
    },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Unknown image id: {0}")]
    UnknownImage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Perceptual hash error: {0}")]
    PerceptualHashError(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[cfg(feature = "network")]
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl MediaError {
    /// Whether a caller may reasonably skip to another item and retry.
    pub fn is_selection_error(&self) -> bool {
        matches!(
            self,
            Self::NoImagesFound { .. } | Self::NoValidImages { .. }
        )
    }

    pub(crate) fn task_failed(err: tokio::task::JoinError) -> Self {
        Self::TaskFailed(err.to_string())
    }

    pub(crate) fn sync_failure(dir: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::RepoSyncFailure {
            dir: dir.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
