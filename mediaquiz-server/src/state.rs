//! Application state module
//!
//! Defines shared state accessible across all request handlers, and the
//! wiring that builds it together with the background worker.

use std::sync::Arc;

use mediaquiz_core::{
    worker::DEFAULT_QUEUE_CAPACITY, ItemCatalog, JobQueue, JobStatusStore, ManifestFetch,
    ManifestSource, MediaCache, MediaConfig, MediaSelector, Notifier, PromotionTask,
    RepositoryHandle, ReviewQueue, SaveUploads, UploadStaging, VerificationTally,
};
use tokio::task::JoinHandle;

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Known items and their categories
    pub catalog: Arc<ItemCatalog>,
    /// Per-submitter upload sessions
    pub uploads: Arc<UploadStaging>,
    /// Pending staged images and their votes
    pub review: Arc<ReviewQueue>,
    /// Save job records, polled by submitters
    pub jobs: Arc<JobStatusStore>,
    /// Queue feeding the background worker
    pub queue: JobQueue,
    /// Source of published manifests for duplicate checks
    pub fetcher: Arc<dyn ManifestFetch>,
    pub manifest_sources: Arc<[ManifestSource]>,
    /// Prefix turning a collection-relative path into a public URL
    pub base_image_url: String,
    pub max_files_per_upload: usize,
}

/// Everything the server runs: request state plus the handles the
/// background schedules need.
pub struct Services {
    pub state: AppState,
    pub promotion: Arc<PromotionTask>,
    pub selector: Arc<MediaSelector>,
    /// Shallow canonical clone backing the quiz cache
    pub cache_repo: Arc<RepositoryHandle>,
    pub worker: JoinHandle<()>,
}

impl Services {
    /// Build repositories, stores and the worker. Must run inside a tokio
    /// runtime because the worker task is spawned here.
    pub fn build(
        config: &MediaConfig,
        catalog: Arc<ItemCatalog>,
        fetcher: Arc<dyn ManifestFetch>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let canonical = Arc::new(RepositoryHandle::for_canonical(config));
        let staging = Arc::new(RepositoryHandle::for_staging(config));
        let cache_repo = Arc::new(RepositoryHandle::for_cache(config));

        let tally = Arc::new(VerificationTally::new());
        let jobs = Arc::new(JobStatusStore::new(config.job_retention));
        let uploads = Arc::new(UploadStaging::new(config, catalog.clone()));

        let review = Arc::new(ReviewQueue::new(
            config,
            staging.clone(),
            fetcher.clone(),
            tally.clone(),
            notifier.clone(),
        ));
        let save = Arc::new(SaveUploads::new(
            config,
            staging.clone(),
            uploads.clone(),
            jobs.clone(),
            notifier.clone(),
        ));
        let promotion = Arc::new(PromotionTask::new(
            config,
            canonical,
            staging,
            catalog.clone(),
            tally,
            notifier,
        ));

        let cache = Arc::new(MediaCache::new(config, cache_repo.clone()));
        let selector = Arc::new(MediaSelector::new(config, cache, catalog.clone()));

        let (queue, worker) =
            mediaquiz_core::spawn_worker(save, promotion.clone(), DEFAULT_QUEUE_CAPACITY);

        let state = AppState {
            catalog,
            uploads,
            review,
            jobs,
            queue,
            fetcher,
            manifest_sources: config.manifest_sources.clone().into(),
            base_image_url: config.base_image_url.clone(),
            max_files_per_upload: config.max_files_per_upload,
        };

        Self {
            state,
            promotion,
            selector,
            cache_repo,
            worker,
        }
    }
}
