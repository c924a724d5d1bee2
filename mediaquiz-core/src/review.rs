//! Crowd review of images pending in the staging collection.
//!
//! Reads only. The staging working copy is refreshed by the background
//! worker (save jobs and promotion runs), never from the request path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::config::{MediaConfig, ManifestSource};
use crate::dedup::DuplicateDetector;
use crate::error::{MediaError, Result};
use crate::fingerprint::{ImageKind, PerceptualHasher};
use crate::index::{ContentIndex, IndexScope, ManifestFetch};
use crate::notify::{Notification, Notifier};
use crate::repo::RepositoryHandle;
use crate::tally::{Decision, TallyStats, VerificationTally};

/// The next image a reviewer should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewItem {
    /// Rotation index of this image; pass it back to continue from here
    pub offset: usize,
    pub id: String,
    pub item: String,
    /// Canonical images that look alike, as URLs
    pub duplicates: Vec<String>,
}

pub struct ReviewQueue {
    staging: Arc<RepositoryHandle>,
    subdir: String,
    fetcher: Arc<dyn ManifestFetch>,
    sources: Vec<ManifestSource>,
    detector: DuplicateDetector,
    base_image_url: String,
    tally: Arc<VerificationTally>,
    notifier: Arc<dyn Notifier>,
}

impl ReviewQueue {
    pub fn new(
        config: &MediaConfig,
        staging: Arc<RepositoryHandle>,
        fetcher: Arc<dyn ManifestFetch>,
        tally: Arc<VerificationTally>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            staging,
            subdir: config.staging_subdir.clone(),
            fetcher,
            sources: config.manifest_sources.clone(),
            detector: DuplicateDetector::new(config.duplicate_distance),
            base_image_url: config.base_image_url.clone(),
            tally,
            notifier,
        }
    }

    pub fn tally(&self) -> &VerificationTally {
        &self.tally
    }

    /// Pending images keyed by id, read from the staging working copy.
    pub async fn pending(&self) -> Result<BTreeMap<String, PathBuf>> {
        let subdir = self.subdir.clone();
        self.staging
            .locked(move |copy| Ok(pending_images(&copy.dir().join(&subdir))))
            .await
    }

    /// First image at or after `offset` (wrapping) that `submitter` has not
    /// voted on. `None` once everything has been reviewed.
    #[instrument(level = "debug", skip(self))]
    pub async fn next_unseen(&self, submitter: &str, offset: usize) -> Result<Option<ReviewItem>> {
        self.staging.ensure_cloned().await?;
        let pending = self.pending().await?;
        let seen = self.tally.seen_by(submitter);
        let ids: Vec<&String> = pending.keys().collect();

        let Some(index) = next_unseen_index(&ids, offset, |id| seen.contains(*id)) else {
            debug!(submitter, pending = ids.len(), "Nothing left to review");
            return Ok(None);
        };

        let id = ids[index].clone();
        let path = pending[&id].clone();
        let item = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let hash = tokio::task::spawn_blocking(move || PerceptualHasher::default().hash_file(&path))
            .await
            .map_err(MediaError::task_failed)??;
        let canonical =
            ContentIndex::build(self.fetcher.as_ref(), &self.sources, IndexScope::CanonicalOnly)
                .await?;
        let duplicates = self
            .detector
            .find_duplicates(&hash, &canonical)
            .into_iter()
            .map(|m| format!("{}{}", self.base_image_url, m.path))
            .collect();

        Ok(Some(ReviewItem {
            offset: index,
            id,
            item,
            duplicates,
        }))
    }

    pub async fn image_path(&self, id: &str) -> Result<PathBuf> {
        self.pending()
            .await?
            .remove(id)
            .ok_or_else(|| MediaError::UnknownImage(id.to_string()))
    }

    /// Record a vote on a pending image and announce it.
    pub async fn confirm(&self, submitter: &str, id: &str, decision: Decision) -> Result<TallyStats> {
        if !self.pending().await?.contains_key(id) {
            return Err(MediaError::UnknownImage(id.to_string()));
        }
        let stats = self.tally.vote(id, submitter, decision)?;
        self.notifier
            .notify(Notification::Verified {
                submitter: submitter.to_string(),
                decision,
            })
            .await;
        Ok(stats)
    }

    pub async fn stats(&self, id: &str) -> Result<TallyStats> {
        if !self.pending().await?.contains_key(id) {
            return Err(MediaError::UnknownImage(id.to_string()));
        }
        Ok(self.tally.stats(id))
    }
}

/// Image files below `root` keyed by file stem. Staged files are named after
/// their content hash, so the stem is the image id.
pub fn pending_images(root: &Path) -> BTreeMap<String, PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ImageKind::mime_for_extension(&ext.to_string_lossy()).starts_with("image/"))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let stem = e.path().file_stem()?.to_string_lossy().into_owned();
            Some((stem, e.into_path()))
        })
        .collect()
}

fn next_unseen_index<T>(ids: &[T], offset: usize, seen: impl Fn(&T) -> bool) -> Option<usize> {
    let n = ids.len();
    (0..n).map(|i| (offset + i) % n).find(|&j| !seen(&ids[j]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_unseen_wraps_from_offset() {
        let ids = ["a", "b", "c", "d"];
        assert_eq!(next_unseen_index(&ids, 0, |_| false), Some(0));
        assert_eq!(next_unseen_index(&ids, 2, |id| *id == "c"), Some(3));
        assert_eq!(next_unseen_index(&ids, 3, |id| *id == "d"), Some(0));
        assert_eq!(next_unseen_index(&ids, 9, |_| false), Some(1));
        assert_eq!(next_unseen_index(&ids, 0, |_| true), None);
        assert_eq!(next_unseen_index::<&str>(&[], 0, |_| false), None);
    }

    #[test]
    fn test_pending_images_keyed_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        let item = dir.path().join("robin");
        std::fs::create_dir_all(&item).unwrap();
        std::fs::write(item.join("abc123.jpg"), b"x").unwrap();
        std::fs::write(item.join("notes.txt"), b"x").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("ffff.png"), b"x").unwrap();

        let pending = pending_images(dir.path());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending["abc123"], item.join("abc123.jpg"));
    }
}
