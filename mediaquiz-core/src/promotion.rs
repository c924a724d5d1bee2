//! Moving images between collections.
//!
//! [`SaveUploads`] copies a submitter's staged uploads into the staging
//! collection. [`PromotionTask`] periodically moves verified images from the
//! staging collection into the canonical one and drops rejected images.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::ItemCatalog;
use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::jobs::{JobState, JobStatusStore};
use crate::manifest::{scan_collection, ManifestEntry};
use crate::notify::{Notification, Notifier};
use crate::push::{interpret_push, NoProgress};
use crate::repo::{Change, Published, RepositoryHandle};
use crate::staging::UploadStaging;
use crate::tally::VerificationTally;

const PROMOTION_COMMIT_MESSAGE: &str = "Update through verification";

/// A staged image located in the staging working tree.
#[derive(Debug, Clone)]
pub struct StagedEntry {
    pub id: String,
    pub item: String,
    /// Absolute path in the staging working copy
    pub path: PathBuf,
    /// Path relative to the working copy root
    pub rel: PathBuf,
    pub filename: String,
}

impl StagedEntry {
    fn from_manifest(root: &Path, subdir: &str, entry: ManifestEntry) -> Option<Self> {
        let item = entry.item()?.to_string();
        let path = root.join(&entry.path);
        let filename = path.file_name()?.to_string_lossy().into_owned();
        Some(Self {
            id: entry.id(),
            item,
            rel: Path::new(subdir).join(&entry.path),
            path,
            filename,
        })
    }
}

/// Outcome of one promotion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub added: usize,
    pub rejected: usize,
    /// Items that received new images
    pub items: Vec<String>,
    /// Commit URLs, canonical first
    pub urls: Vec<String>,
    /// Repositories whose push was not confirmed
    pub failed: Vec<String>,
}

impl PromotionReport {
    pub fn changed(&self) -> bool {
        self.added > 0 || self.rejected > 0
    }
}

fn scan_staged(workdir: &Path, subdir: &str) -> Result<BTreeMap<String, StagedEntry>> {
    let root = workdir.join(subdir);
    if !root.exists() {
        return Ok(BTreeMap::new());
    }
    Ok(scan_collection(&root)?
        .into_iter()
        .filter_map(|entry| StagedEntry::from_manifest(&root, subdir, entry))
        .map(|entry| (entry.id.clone(), entry))
        .collect())
}

/// Index the pending images of the staging working copy by id.
pub async fn staging_manifest(
    staging: &RepositoryHandle,
    subdir: &str,
) -> Result<BTreeMap<String, StagedEntry>> {
    let subdir = subdir.to_string();
    staging
        .locked(move |copy| scan_staged(copy.dir(), &subdir))
        .await
}

/// Delete `rel` below the working copy and its parent directory once empty.
fn remove_tracked(workdir: &Path, rel: &Path) -> Result<()> {
    let path = workdir.join(rel);
    match std::fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(dir) = path.parent() {
        if std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false) {
            std::fs::remove_dir(dir)?;
        }
    }
    Ok(())
}

fn write_file(workdir: &Path, rel: &Path, bytes: &[u8]) -> Result<()> {
    let dest = workdir.join(rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)?;
    Ok(())
}

/// Decode a publish outcome. `None` means the remote already had everything.
fn confirm_push(repo: &str, published: Option<&Published>) -> Result<Option<Vec<String>>> {
    let Some(published) = published else {
        return Ok(None);
    };
    let flags = interpret_push(repo, &published.results)?;
    if published.results.iter().any(|r| r.flags.is_failure()) {
        return Err(MediaError::PushFailure {
            repo: format!("{repo} ({})", flags.join(", ")),
        });
    }
    Ok(Some(flags))
}

pub struct PromotionTask {
    canonical: Arc<RepositoryHandle>,
    staging: Arc<RepositoryHandle>,
    catalog: Arc<ItemCatalog>,
    tally: Arc<VerificationTally>,
    notifier: Arc<dyn Notifier>,
    config: MediaConfig,
}

impl PromotionTask {
    pub fn new(
        config: &MediaConfig,
        canonical: Arc<RepositoryHandle>,
        staging: Arc<RepositoryHandle>,
        catalog: Arc<ItemCatalog>,
        tally: Arc<VerificationTally>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            canonical,
            staging,
            catalog,
            tally,
            notifier,
            config: config.clone(),
        }
    }

    /// One promotion pass.
    ///
    /// Every run refreshes the staging working copy, which is what keeps the
    /// review queue current. Each repository is then synced, edited, committed
    /// and pushed under a single lock acquisition, canonical first. Tallies of
    /// promoted or rejected images are cleared only once both pushes are
    /// confirmed; on failure the next sync discards the local commit and the
    /// next run retries with the votes intact.
    #[instrument(level = "debug", skip_all)]
    pub async fn run_once(&self) -> Result<PromotionReport> {
        let decisions = self.tally.decisions(self.config.vote_threshold);

        let subdir = self.config.staging_subdir.clone();
        let wanted: BTreeSet<String> = decisions.accepted.iter().cloned().collect();
        let (staged, mut payloads) = self
            .staging
            .locked(move |copy| {
                copy.sync()?;
                let staged = scan_staged(copy.dir(), &subdir)?;
                let mut payloads = BTreeMap::new();
                for id in &wanted {
                    if let Some(entry) = staged.get(id) {
                        payloads.insert(id.clone(), std::fs::read(&entry.path)?);
                    }
                }
                Ok((staged, payloads))
            })
            .await?;

        if decisions.is_empty() {
            info!("No verified images to promote");
            return Ok(PromotionReport::default());
        }

        let vanished: Vec<String> = decisions
            .all()
            .filter(|id| !staged.contains_key(*id))
            .cloned()
            .collect();
        if !vanished.is_empty() {
            warn!(count = vanished.len(), "Decided images no longer staged");
            self.tally.clear(&vanished);
        }

        let rejected: Vec<StagedEntry> = decisions
            .rejected
            .iter()
            .filter_map(|id| staged.get(id).cloned())
            .collect();

        let mut accepted = Vec::new();
        for id in &decisions.accepted {
            let Some(entry) = staged.get(id) else { continue };
            let Some(bytes) = payloads.remove(id) else { continue };
            match self.catalog.category_of(&entry.item) {
                Some(category) => {
                    let dest = PathBuf::from(category).join(&entry.item).join(&entry.filename);
                    accepted.push((dest, bytes, entry.clone()));
                }
                None => warn!(id = %id, item = %entry.item, "Verified image has no category; leaving it staged"),
            }
        }

        if rejected.is_empty() && accepted.is_empty() {
            return Ok(PromotionReport::default());
        }

        let items: BTreeSet<String> = accepted.iter().map(|(_, _, e)| e.item.clone()).collect();
        let mut report = PromotionReport {
            added: accepted.len(),
            rejected: rejected.len(),
            items: items.into_iter().collect(),
            ..Default::default()
        };
        let done: Vec<String> = rejected
            .iter()
            .chain(accepted.iter().map(|(_, _, e)| e))
            .map(|e| e.id.clone())
            .collect();
        let removals: Vec<PathBuf> = rejected
            .iter()
            .chain(accepted.iter().map(|(_, _, e)| e))
            .map(|e| e.rel.clone())
            .collect();
        let writes: Vec<(PathBuf, Vec<u8>)> = accepted
            .into_iter()
            .map(|(dest, bytes, _)| (dest, bytes))
            .collect();

        // Canonical goes first: if it fails, staging keeps the images and the
        // next sync discards the local canonical commit.
        let canonical = if writes.is_empty() {
            Ok(None)
        } else {
            self.canonical
                .locked(move |copy| {
                    copy.sync()?;
                    for (rel, bytes) in &writes {
                        write_file(copy.dir(), rel, bytes)?;
                    }
                    let expected: Vec<Change> =
                        writes.iter().map(|(rel, _)| Change::Added(rel.clone())).collect();
                    copy.publish(PROMOTION_COMMIT_MESSAGE, &expected, &NoProgress)
                })
                .await
        };
        if !self.record_publish(&self.canonical, 0, canonical, &mut report).await {
            return Ok(report);
        }

        let staging = self
            .staging
            .locked(move |copy| {
                copy.sync()?;
                for rel in &removals {
                    remove_tracked(copy.dir(), rel)?;
                }
                let expected: Vec<Change> =
                    removals.iter().map(|rel| Change::Removed(rel.clone())).collect();
                copy.publish(PROMOTION_COMMIT_MESSAGE, &expected, &NoProgress)
            })
            .await;
        if !self.record_publish(&self.staging, 1, staging, &mut report).await {
            return Ok(report);
        }

        self.tally.clear(&done);
        self.notifier
            .notify(Notification::Promoted {
                added: report.added,
                rejected: report.rejected,
                items: report.items.clone(),
                urls: report.urls.clone(),
            })
            .await;
        info!(added = report.added, rejected = report.rejected, "Promotion complete");
        Ok(report)
    }

    /// Fold one repository's publish outcome into the report. Returns false
    /// when the push was not confirmed.
    async fn record_publish(
        &self,
        repo: &RepositoryHandle,
        url_index: usize,
        outcome: Result<Option<Published>>,
        report: &mut PromotionReport,
    ) -> bool {
        let confirmed = outcome.and_then(|published| {
            confirm_push(repo.name(), published.as_ref())?;
            Ok(published.and_then(|p| self.config.commit_url(url_index, &p.commit)))
        });
        match confirmed {
            Ok(url) => {
                report.urls.extend(url);
                true
            }
            Err(e) => {
                warn!(repo = repo.name(), error = %e, "Promotion push failed");
                report.failed.push(repo.name().to_string());
                self.notifier
                    .notify(Notification::Error {
                        message: format!(
                            "Push for {} on verified image transfer failed: {e}",
                            repo.name()
                        ),
                    })
                    .await;
                false
            }
        }
    }
}

/// Copies a submitter's staged uploads into the staging collection.
pub struct SaveUploads {
    staging: Arc<RepositoryHandle>,
    uploads: Arc<UploadStaging>,
    jobs: Arc<JobStatusStore>,
    notifier: Arc<dyn Notifier>,
    subdir: String,
}

impl SaveUploads {
    pub fn new(
        config: &MediaConfig,
        staging: Arc<RepositoryHandle>,
        uploads: Arc<UploadStaging>,
        jobs: Arc<JobStatusStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            staging,
            uploads,
            jobs,
            notifier,
            subdir: config.staging_subdir.clone(),
        }
    }

    /// Run the save job; the outcome is also recorded in the job store.
    ///
    /// Staged uploads are removed only after the push is confirmed.
    #[instrument(level = "debug", skip(self))]
    pub async fn run(&self, submitter: &str, display_name: &str) -> Result<JobState> {
        self.jobs.mark_running(submitter);

        let state = match self.save(submitter, display_name).await {
            Ok(state) => state,
            Err(e) => {
                warn!(submitter, error = %e, "Save job failed");
                self.notifier
                    .notify(Notification::Error {
                        message: format!("Saving uploads for {submitter} failed: {e}"),
                    })
                    .await;
                JobState::Failed
            }
        };
        self.jobs.complete(submitter, state.clone());
        Ok(state)
    }

    async fn save(&self, submitter: &str, display_name: &str) -> Result<JobState> {
        let session = self.uploads.list_staged(submitter).await?;
        if session.is_empty() {
            return Err(MediaError::NotFound("no uploaded images".to_string()));
        }

        let copies: Vec<(PathBuf, PathBuf)> = session
            .images
            .iter()
            .map(|image| {
                (
                    image.path.clone(),
                    PathBuf::from(&self.subdir).join(&image.item).join(image.filename()),
                )
            })
            .collect();
        let message = format!("add images: id-{submitter}\n\nUsername: {display_name}");
        let progress = self.jobs.reporter(submitter);

        let published = self
            .staging
            .locked(move |copy| {
                copy.sync()?;
                for (src, rel) in &copies {
                    let dest = copy.dir().join(rel);
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::copy(src, &dest)?;
                }
                let expected: Vec<Change> =
                    copies.iter().map(|(_, rel)| Change::Added(rel.clone())).collect();
                copy.publish(&message, &expected, progress.as_ref())
            })
            .await?;

        let state = match confirm_push(self.staging.name(), published.as_ref())? {
            Some(flags) => JobState::Succeeded(flags),
            // identical files were already in the collection
            None => JobState::Succeeded(vec!["UP_TO_DATE".to_string()]),
        };

        self.uploads.remove_saved(submitter, &session.images).await?;
        let items: BTreeSet<String> = session.images.iter().map(|i| i.item.clone()).collect();
        self.notifier
            .notify(Notification::Added {
                submitter: display_name.to_string(),
                count: session.images.len(),
                items: items.into_iter().collect(),
            })
            .await;
        Ok(state)
    }
}
