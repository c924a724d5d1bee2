//! MediaQuiz Core - media asset pipeline for a crowd-curated picture quiz
//!
//! This crate keeps a version-controlled image collection usable by a quiz
//! bot: it syncs working copies, serves non-repeating images per channel,
//! screens submissions for duplicates, stages uploads, tallies crowd votes and
//! promotes verified images into the canonical collection.
//!
//! # Features
//!
//! - Working copies guarded by advisory file locks with fencing tokens
//! - SHA3-256 content ids and 64-bit Blockhash perceptual fingerprints
//! - Manifest-backed content index merged from several collections
//! - Per-channel image rotation with bounded sync retries and eviction
//! - Two-phase promotion: tallies are cleared only after both pushes land
//! - Background worker with pollable job status and push progress
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediaquiz_core::{ItemCatalog, MediaCache, MediaConfig, MediaSelector, RepositoryHandle};
//!
//! # async fn example() -> mediaquiz_core::Result<()> {
//! let config = MediaConfig::from_env()?;
//! let catalog = Arc::new(ItemCatalog::load(&config.catalog_dir)?);
//! let cache_repo = Arc::new(RepositoryHandle::for_cache(&config));
//! let cache = Arc::new(MediaCache::new(&config, cache_repo));
//! let selector = MediaSelector::new(&config, cache, catalog);
//!
//! let served = selector.serve("general").await?;
//! println!("{} -> {}", served.item, served.image.path.display());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod jobs;
pub mod lock;
pub mod manifest;
pub mod notify;
pub mod promotion;
pub mod push;
pub mod repo;
pub mod review;
pub mod staging;
pub mod tally;
pub mod worker;

pub use cache::{ChannelMediaState, MediaCache, MediaSelector, SelectedImage, ServedImage};
pub use catalog::ItemCatalog;
pub use config::{GitIdentity, ManifestSource, MediaConfig, SourceKind};
pub use dedup::{DuplicateDetector, DuplicateGroup, DuplicateMatch};
pub use error::{MediaError, Result};
pub use fingerprint::{ContentHash, ImageKind, PerceptualHash, PerceptualHasher};
pub use index::{ContentIndex, IndexScope, InMemoryManifests, ManifestFetch};
pub use jobs::{JobState, JobStatus, JobStatusStore};
pub use lock::{DirectoryLock, LockGuard};
pub use notify::{LogNotifier, Notification, Notifier};
pub use promotion::{PromotionReport, PromotionTask, SaveUploads};
pub use push::{Progress, ProgressReporter, PushFlag, PushFlags, PushResult};
pub use repo::{Change, CollectionSync, Published, RepoState, RepositoryHandle, WorkingCopy};
pub use review::{ReviewItem, ReviewQueue};
pub use staging::{StageOutcome, Upload, UploadIndex, UploadReport, UploadSession, UploadStaging};
pub use tally::{Decision, TallyStats, VerificationTally};
pub use worker::{spawn_periodic, spawn_worker, Job, JobQueue};

#[cfg(feature = "network")]
pub use index::HttpManifestFetcher;
