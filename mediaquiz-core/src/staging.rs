//! Per-submitter upload staging.
//!
//! Uploads land in `{upload_dir}/{submitter}/{item}/{id}.{ext}` until the
//! submitter saves them into the staging collection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ItemCatalog;
use crate::config::{ManifestSource, MediaConfig};
use crate::dedup::{DuplicateDetector, DuplicateMatch};
use crate::error::{MediaError, Result};
use crate::fingerprint::{ContentHash, ImageKind, PerceptualHasher};
use crate::index::{ContentIndex, IndexScope, ManifestFetch};

/// One uploaded file as received.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    /// Declared MIME type
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Result of staging a single upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Accepted {
        id: String,
        near_duplicates: Vec<DuplicateMatch>,
    },
    /// Content hash already published; nothing was written.
    RejectedExactDuplicate { existing: String },
    Invalid { reason: String },
}

/// Indexes consulted while staging.
#[derive(Debug, Clone, Default)]
pub struct UploadIndex {
    /// Every source, for exact-duplicate rejection
    pub identity: ContentIndex,
    /// Canonical sources only, for near-duplicate hints
    pub canonical: ContentIndex,
}

impl UploadIndex {
    pub async fn build(fetcher: &dyn ManifestFetch, sources: &[ManifestSource]) -> Result<Self> {
        let (identity, canonical) = tokio::try_join!(
            ContentIndex::build(fetcher, sources, IndexScope::All),
            ContentIndex::build(fetcher, sources, IndexScope::CanonicalOnly),
        )?;
        Ok(Self {
            identity,
            canonical,
        })
    }
}

/// Outcome of a multi-file upload, keyed by original filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub invalid: Vec<String>,
    pub rejected: Vec<String>,
    pub duplicates: BTreeMap<String, Vec<DuplicateMatch>>,
    pub ids: BTreeMap<String, String>,
}

/// A file waiting in a submitter's upload area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedImage {
    pub id: String,
    pub item: String,
    pub path: PathBuf,
    pub size: u64,
}

impl StagedImage {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Everything a submitter has staged, grouped by item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    pub submitter: String,
    pub images: Vec<StagedImage>,
}

impl UploadSession {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// `{item: [filename]}` view.
    pub fn by_item(&self) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for image in &self.images {
            out.entry(image.item.clone())
                .or_default()
                .push(image.filename());
        }
        out
    }
}

pub struct UploadStaging {
    root: PathBuf,
    catalog: Arc<ItemCatalog>,
    detector: DuplicateDetector,
    allowed_mime_types: Vec<String>,
    max_bytes: u64,
    max_files: usize,
}

impl UploadStaging {
    pub fn new(config: &MediaConfig, catalog: Arc<ItemCatalog>) -> Self {
        Self {
            root: config.upload_dir.clone(),
            catalog,
            detector: DuplicateDetector::new(config.duplicate_distance),
            allowed_mime_types: config.allowed_mime_types.clone(),
            max_bytes: config.max_image_bytes,
            max_files: config.max_files_per_upload,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    fn submitter_dir(&self, submitter: &str) -> Result<PathBuf> {
        Ok(self.root.join(path_component(submitter)?))
    }

    /// Validate and persist one upload.
    ///
    /// Checks run in order: declared type and size, exact duplicate against
    /// every published manifest, decode check, near duplicates against the
    /// canonical manifests, then an atomic write.
    #[instrument(level = "debug", skip(self, upload, index), fields(filename = %upload.filename, bytes = upload.bytes.len()))]
    pub async fn stage_upload(
        &self,
        submitter: &str,
        item: &str,
        upload: Upload,
        index: &UploadIndex,
    ) -> Result<StageOutcome> {
        let item = item.trim().to_lowercase();
        self.catalog.require_category(&item)?;
        let item_dir = self.submitter_dir(submitter)?.join(path_component(&item)?);

        if !self.allowed_mime_types.contains(&upload.content_type) {
            return Ok(invalid(format!("unsupported type {}", upload.content_type)));
        }
        if upload.bytes.len() as u64 > self.max_bytes {
            return Ok(invalid(format!(
                "{} bytes exceeds limit of {}",
                upload.bytes.len(),
                self.max_bytes
            )));
        }

        let id = ContentHash::from_bytes(&upload.bytes).to_hex();
        if let Some(existing) = index.identity.path_for_content(&id) {
            info!(id = %id, existing, "Rejected exact duplicate");
            return Ok(StageOutcome::RejectedExactDuplicate {
                existing: existing.to_string(),
            });
        }

        let bytes = upload.bytes;
        let checked = tokio::task::spawn_blocking(move || {
            let kind = ImageKind::sniff(&bytes).filter(ImageKind::is_stageable);
            let hash = PerceptualHasher::default().hash_bytes(&bytes);
            (bytes, kind, hash)
        })
        .await
        .map_err(MediaError::task_failed)?;

        let (bytes, kind, hash) = checked;
        let Some(kind) = kind else {
            return Ok(invalid("content is not a JPEG or PNG image".to_string()));
        };
        let hash = match hash {
            Ok(hash) => hash,
            Err(e) => return Ok(invalid(e.to_string())),
        };

        let near_duplicates = self.detector.find_duplicates(&hash, &index.canonical);

        tokio::fs::create_dir_all(&item_dir).await?;
        let target = item_dir.join(format!("{id}.{}", kind.extension()));
        let tmp = item_dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        info!(
            submitter,
            item = %item,
            id = %id,
            near_duplicates = near_duplicates.len(),
            "Upload staged"
        );
        Ok(StageOutcome::Accepted {
            id,
            near_duplicates,
        })
    }

    /// Stage several files for one item and summarise per filename.
    pub async fn stage_batch(
        &self,
        submitter: &str,
        item: &str,
        uploads: Vec<Upload>,
        index: &UploadIndex,
    ) -> Result<UploadReport> {
        if uploads.is_empty() {
            return Err(MediaError::InvalidUpload("no files".to_string()));
        }
        if uploads.len() > self.max_files {
            return Err(MediaError::InvalidUpload(format!(
                "at most {} files per upload",
                self.max_files
            )));
        }

        let mut report = UploadReport::default();
        for upload in uploads {
            let filename = upload.filename.clone();
            match self.stage_upload(submitter, item, upload, index).await? {
                StageOutcome::Accepted {
                    id,
                    near_duplicates,
                } => {
                    if !near_duplicates.is_empty() {
                        report.duplicates.insert(filename.clone(), near_duplicates);
                    }
                    report.ids.insert(filename, id);
                }
                StageOutcome::RejectedExactDuplicate { .. } => report.rejected.push(filename),
                StageOutcome::Invalid { reason } => {
                    debug!(filename = %filename, reason = %reason, "Upload invalid");
                    report.invalid.push(filename);
                }
            }
        }
        Ok(report)
    }

    /// Everything staged by `submitter`, sorted by item then filename.
    pub async fn list_staged(&self, submitter: &str) -> Result<UploadSession> {
        let dir = self.submitter_dir(submitter)?;
        let mut images = Vec::new();

        let mut items = match tokio::fs::read_dir(&dir).await {
            Ok(items) => items,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(UploadSession {
                    submitter: submitter.to_string(),
                    images,
                })
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(item_entry) = items.next_entry().await? {
            if !item_entry.file_type().await?.is_dir() {
                continue;
            }
            let item = item_entry.file_name().to_string_lossy().into_owned();
            let mut files = tokio::fs::read_dir(item_entry.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    continue;
                }
                let metadata = file.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }
                let id = name.split('.').next().unwrap_or_default().to_string();
                images.push(StagedImage {
                    id,
                    item: item.clone(),
                    path: file.path(),
                    size: metadata.len(),
                });
            }
        }

        images.sort_by(|a, b| a.item.cmp(&b.item).then_with(|| a.path.cmp(&b.path)));
        Ok(UploadSession {
            submitter: submitter.to_string(),
            images,
        })
    }

    /// Path of a staged file, for previews.
    pub async fn staged_file(&self, submitter: &str, item: &str, filename: &str) -> Result<PathBuf> {
        let path = self
            .submitter_dir(submitter)?
            .join(path_component(item)?)
            .join(path_component(filename)?);
        if tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            Ok(path)
        } else {
            Err(MediaError::NotFound(format!("{item}/{filename}")))
        }
    }

    /// Remove one staged image, and its item directory when emptied.
    pub async fn delete_staged(&self, submitter: &str, id: &str) -> Result<()> {
        let session = self.list_staged(submitter).await?;
        if session.is_empty() {
            return Err(MediaError::NotFound("no uploaded images".to_string()));
        }
        let image = session
            .images
            .iter()
            .find(|image| image.id == id)
            .ok_or_else(|| MediaError::NotFound(format!("image id {id}")))?;

        self.remove_image(submitter, image).await?;
        info!(submitter, id, "Staged image deleted");
        Ok(())
    }

    /// Remove the images a save job copied out. Uploads staged after the
    /// job listed the session are left in place.
    pub async fn remove_saved(&self, submitter: &str, saved: &[StagedImage]) -> Result<()> {
        for image in saved {
            if let Err(e) = self.remove_image(submitter, image).await {
                warn!(submitter, id = %image.id, error = %e, "Failed to remove saved upload");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Delete one file, then any directories it leaves empty.
    async fn remove_image(&self, submitter: &str, image: &StagedImage) -> Result<()> {
        match tokio::fs::remove_file(&image.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(item_dir) = image.path.parent() {
            if dir_is_empty(item_dir).await {
                tokio::fs::remove_dir(item_dir).await?;
            }
        }
        let submitter_dir = self.submitter_dir(submitter)?;
        if dir_is_empty(&submitter_dir).await {
            tokio::fs::remove_dir(&submitter_dir).await?;
        }
        Ok(())
    }
}

fn invalid(reason: String) -> StageOutcome {
    StageOutcome::Invalid { reason }
}

async fn dir_is_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

/// Accept a single path component; reject separators and dot segments.
pub fn path_component(value: &str) -> Result<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(MediaError::InvalidUpload(format!(
            "invalid path component: {value:?}"
        )));
    }
    Ok(trimmed)
}
