//! Local image cache and per-channel selection.
//!
//! The cache is a read-only working copy of the canonical collection laid out
//! as `{root}/{category}/{item}/{file}`. Selection walks an item's files in a
//! rotating order so consecutive serves in one channel do not repeat an image.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ItemCatalog;
use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::repo::CollectionSync;

/// Selection retries after the first attempt fails with a selection error.
pub const MAX_SERVE_RETRIES: usize = 2;

/// An image chosen for serving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedImage {
    pub path: PathBuf,
    /// Lowercase file extension
    pub extension: String,
    /// Offset within the item's sorted candidate list
    pub offset: usize,
}

/// File listing entry used by the rotation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub size: u64,
}

/// Cache of the canonical collection.
pub struct MediaCache {
    root: PathBuf,
    sync: Arc<dyn CollectionSync>,
    allowed_extensions: Vec<String>,
    max_bytes: u64,
    sync_retries: u32,
}

impl MediaCache {
    pub fn new(config: &MediaConfig, sync: Arc<dyn CollectionSync>) -> Self {
        Self {
            root: config.cache_dir.clone(),
            sync,
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            max_bytes: config.max_image_bytes,
            sync_retries: config.sync_retries,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_dir(&self, category: &str, item: &str) -> PathBuf {
        self.root.join(category).join(item)
    }

    /// Files of an item directory, sorted by name.
    ///
    /// A missing or empty directory triggers up to `sync_retries` collection
    /// syncs, re-listing after each. Still empty afterwards yields an empty list.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_candidates(&self, category: &str, item: &str) -> Vec<Candidate> {
        let dir = self.item_dir(category, item);

        let mut candidates = list_dir(&dir).await;
        let mut attempts = 0;
        while candidates.is_empty() && attempts < self.sync_retries {
            attempts += 1;
            debug!(item, attempt = attempts, "No cached files, syncing collection");
            if let Err(e) = self.sync.sync().await {
                warn!(item, attempt = attempts, error = %e, "Collection sync failed");
            }
            candidates = list_dir(&dir).await;
        }

        if candidates.is_empty() {
            warn!(item, attempts, "No files after sync retries");
        }
        candidates
    }

    /// Choose the next valid image for an item after `prev_offset`.
    pub async fn select_image(
        &self,
        category: &str,
        item: &str,
        prev_offset: Option<usize>,
    ) -> Result<SelectedImage> {
        let candidates = self.list_candidates(category, item).await;
        select_rotation(
            item,
            &candidates,
            prev_offset,
            &self.allowed_extensions,
            self.max_bytes,
        )
    }

    /// Delete cached item directories. Missing directories are ignored.
    pub async fn evict(&self, catalog: &ItemCatalog, items: &[String]) -> Result<()> {
        for item in items {
            let Some(category) = catalog.category_of(item) else {
                continue;
            };
            let dir = self.item_dir(category, item);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => info!(item = %item, dir = %dir.display(), "Evicted cached item"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

async fn list_dir(dir: &Path) -> Vec<Candidate> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if metadata.is_file() {
            candidates.push(Candidate {
                path: entry.path(),
                size: metadata.len(),
            });
        }
    }
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    candidates
}

/// Rotating scan: start at `(prev + 1) mod N` and accept the first candidate
/// with an allowed extension and a size below `max_bytes`.
pub fn select_rotation(
    item: &str,
    candidates: &[Candidate],
    prev_offset: Option<usize>,
    allowed_extensions: &[String],
    max_bytes: u64,
) -> Result<SelectedImage> {
    if candidates.is_empty() {
        return Err(MediaError::NoImagesFound {
            item: item.to_string(),
        });
    }

    let n = candidates.len();
    let start = prev_offset.map(|p| (p + 1) % n).unwrap_or(0);

    for step in 0..n {
        let offset = (start + step) % n;
        let candidate = &candidates[offset];
        let extension = candidate
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if allowed_extensions.contains(&extension) && candidate.size < max_bytes {
            return Ok(SelectedImage {
                path: candidate.path.clone(),
                extension,
                offset,
            });
        }
    }

    Err(MediaError::NoValidImages {
        item: item.to_string(),
        candidates: n,
    })
}

/// Pick an item at random, avoiding `previous` unless it is the only choice.
pub fn choose_item<'a>(items: &[&'a str], previous: Option<&str>) -> Option<&'a str> {
    let eligible: Vec<&'a str> = items
        .iter()
        .copied()
        .filter(|item| Some(*item) != previous)
        .collect();
    let pool = if eligible.is_empty() { items } else { &eligible[..] };
    pool.choose(&mut rand::rng()).copied()
}

/// Per-channel selection state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelMediaState {
    /// Item currently being asked
    pub item: Option<String>,
    /// Whether the current item has been answered
    pub answered: bool,
    /// Rotation offset of the last served image
    pub prev_offset: Option<usize>,
    /// Last item served
    pub prev_item: Option<String>,
}

impl ChannelMediaState {
    fn fresh() -> Self {
        Self {
            answered: true,
            ..Default::default()
        }
    }
}

/// Channel states, created lazily. Writes are last-write-wins.
#[derive(Default)]
pub struct ChannelStates {
    states: DashMap<String, ChannelMediaState>,
}

impl ChannelStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: &str) -> ChannelMediaState {
        self.states
            .get(channel)
            .map(|s| s.clone())
            .unwrap_or_else(ChannelMediaState::fresh)
    }

    pub fn set(&self, channel: &str, state: ChannelMediaState) {
        self.states.insert(channel.to_string(), state);
    }

    pub fn mark_answered(&self, channel: &str) {
        self.states
            .entry(channel.to_string())
            .or_insert_with(ChannelMediaState::fresh)
            .answered = true;
    }
}

/// Serve counters driving cache eviction.
#[derive(Default)]
pub struct FrequencyTracker {
    counts: DashMap<String, u32>,
}

impl FrequencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, item: &str) {
        *self.counts.entry(item.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, item: &str) -> u32 {
        self.counts.get(item).map(|c| *c).unwrap_or(0)
    }

    /// Take at most `batch` items whose counter exceeds `threshold`, highest
    /// counters first, and reset their counters to zero.
    pub fn take_evictions(&self, threshold: u32, batch: usize) -> Vec<String> {
        let mut over: Vec<(String, u32)> = self
            .counts
            .iter()
            .filter(|e| *e.value() > threshold)
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        over.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        over.truncate(batch);

        for (item, _) in &over {
            if let Some(mut count) = self.counts.get_mut(item) {
                *count = 0;
            }
        }
        over.into_iter().map(|(item, _)| item).collect()
    }
}

/// An image served to a channel.
#[derive(Debug, Clone, Serialize)]
pub struct ServedImage {
    pub item: String,
    pub category: String,
    pub image: SelectedImage,
}

/// Channel-facing selector combining item choice, rotation and eviction.
pub struct MediaSelector {
    cache: Arc<MediaCache>,
    catalog: Arc<ItemCatalog>,
    states: ChannelStates,
    frequency: FrequencyTracker,
    eviction_threshold: u32,
    eviction_batch: usize,
}

impl MediaSelector {
    pub fn new(config: &MediaConfig, cache: Arc<MediaCache>, catalog: Arc<ItemCatalog>) -> Self {
        Self {
            cache,
            catalog,
            states: ChannelStates::new(),
            frequency: FrequencyTracker::new(),
            eviction_threshold: config.eviction_threshold,
            eviction_batch: config.eviction_batch,
        }
    }

    pub fn states(&self) -> &ChannelStates {
        &self.states
    }

    pub fn frequency(&self) -> &FrequencyTracker {
        &self.frequency
    }

    /// Serve an image to `channel`.
    ///
    /// An answered (or new) channel gets a new item, different from the last
    /// one when possible; otherwise another image of the current item. A
    /// selection failure skips to a different item, at most
    /// [`MAX_SERVE_RETRIES`] times.
    #[instrument(level = "debug", skip(self))]
    pub async fn serve(&self, channel: &str) -> Result<ServedImage> {
        let mut state = self.states.get(channel);
        let items = self.catalog.items();

        let mut item = match (&state.item, state.answered) {
            (Some(current), false) => current.clone(),
            _ => choose_item(&items, state.prev_item.as_deref())
                .ok_or_else(|| MediaError::Config("item catalog is empty".to_string()))?
                .to_string(),
        };

        let mut attempt = 0;
        loop {
            let category = self.catalog.require_category(&item)?.to_string();
            match self
                .cache
                .select_image(&category, &item, state.prev_offset)
                .await
            {
                Ok(image) => {
                    state.item = Some(item.clone());
                    state.prev_item = Some(item.clone());
                    state.answered = false;
                    state.prev_offset = Some(image.offset);
                    self.states.set(channel, state);
                    self.frequency.record(&item);

                    debug!(channel, item = %item, offset = image.offset, "Served image");
                    return Ok(ServedImage {
                        item,
                        category,
                        image,
                    });
                }
                Err(e) if e.is_selection_error() && attempt < MAX_SERVE_RETRIES => {
                    attempt += 1;
                    warn!(channel, item = %item, attempt, error = %e, "Skipping item");
                    item = choose_item(&items, Some(&item))
                        .map(str::to_string)
                        .unwrap_or(item);
                }
                Err(e) => {
                    state.answered = true;
                    state.prev_item = Some(item);
                    self.states.set(channel, state);
                    return Err(e);
                }
            }
        }
    }

    pub fn mark_answered(&self, channel: &str) {
        self.states.mark_answered(channel);
    }

    /// Evict the most-served items from the cache.
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let items = self
            .frequency
            .take_evictions(self.eviction_threshold, self.eviction_batch);
        if !items.is_empty() {
            self.cache.evict(&self.catalog, &items).await?;
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSync(AtomicUsize);

    #[async_trait]
    impl CollectionSync for CountingSync {
        async fn sync(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn exts() -> Vec<String> {
        ["jpg", "jpeg", "png", "gif"].iter().map(|s| s.to_string()).collect()
    }

    fn candidate(name: &str, size: u64) -> Candidate {
        Candidate {
            path: PathBuf::from(name),
            size,
        }
    }

    #[test]
    fn test_rotation_does_not_repeat() {
        let candidates = vec![
            candidate("a.jpg", 10),
            candidate("b.txt", 10),
            candidate("c.png", 10),
            candidate("d.gif", 5_000_000),
        ];

        let mut prev = None;
        let mut served = Vec::new();
        for _ in 0..4 {
            let image = select_rotation("x", &candidates, prev, &exts(), 4_000_000).unwrap();
            prev = Some(image.offset);
            served.push(image.path);
        }
        for pair in served.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
        assert_eq!(served[0], PathBuf::from("a.jpg"));
        assert_eq!(served[1], PathBuf::from("c.png"));
    }

    #[test]
    fn test_size_limit_is_exclusive() {
        let candidates = vec![candidate("big.jpg", 4_000_000)];
        let err = select_rotation("x", &candidates, None, &exts(), 4_000_000).unwrap_err();
        assert!(matches!(err, MediaError::NoValidImages { candidates: 1, .. }));
    }

    #[test]
    fn test_extension_case_insensitive() {
        let candidates = vec![candidate("A.JPG", 1)];
        let image = select_rotation("x", &candidates, Some(7), &exts(), 10).unwrap();
        assert_eq!(image.extension, "jpg");
        assert_eq!(image.offset, 0);
    }

    #[test]
    fn test_choose_item_avoids_previous() {
        let items = ["a", "b"];
        for _ in 0..20 {
            assert_eq!(choose_item(&items, Some("a")), Some("b"));
        }
        assert_eq!(choose_item(&["a"], Some("a")), Some("a"));
        assert_eq!(choose_item(&[], None), None);
    }

    #[test]
    fn test_eviction_takes_top_three_over_threshold() {
        let tracker = FrequencyTracker::new();
        for (item, n) in [("a", 11), ("b", 15), ("c", 12), ("d", 20), ("e", 10)] {
            for _ in 0..n {
                tracker.record(item);
            }
        }

        let evicted = tracker.take_evictions(10, 3);
        assert_eq!(evicted, vec!["d", "b", "c"]);
        assert_eq!(tracker.count("d"), 0);
        assert_eq!(tracker.count("a"), 11);
        assert_eq!(tracker.count("e"), 10);
    }

    #[tokio::test]
    async fn test_missing_item_syncs_exactly_three_times() {
        let dir = tempfile::tempdir().unwrap();
        let sync = Arc::new(CountingSync(AtomicUsize::new(0)));
        let config = MediaConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let cache = MediaCache::new(&config, sync.clone());

        assert!(cache.list_candidates("birds", "robin").await.is_empty());
        assert_eq!(sync.0.load(Ordering::SeqCst), 3);

        let err = cache.select_image("birds", "robin", None).await.unwrap_err();
        assert!(matches!(err, MediaError::NoImagesFound { .. }));
    }

    #[tokio::test]
    async fn test_serve_rotates_and_switches_after_answer() {
        let dir = tempfile::tempdir().unwrap();
        for item in ["robin", "wren"] {
            let item_dir = dir.path().join("birds").join(item);
            std::fs::create_dir_all(&item_dir).unwrap();
            std::fs::write(item_dir.join("1.jpg"), b"x").unwrap();
            std::fs::write(item_dir.join("2.jpg"), b"y").unwrap();
        }
        let config = MediaConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let cache = Arc::new(MediaCache::new(
            &config,
            Arc::new(CountingSync(AtomicUsize::new(0))),
        ));
        let catalog = Arc::new(ItemCatalog::from_pairs([("birds", "robin"), ("birds", "wren")]));
        let selector = MediaSelector::new(&config, cache, catalog);

        let first = selector.serve("chan").await.unwrap();
        let second = selector.serve("chan").await.unwrap();
        assert_eq!(first.item, second.item);
        assert_ne!(first.image.path, second.image.path);

        selector.mark_answered("chan");
        let third = selector.serve("chan").await.unwrap();
        assert_ne!(third.item, second.item);
    }

    #[tokio::test]
    async fn test_serve_skips_item_without_images() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("birds").join("wren");
        std::fs::create_dir_all(&good).unwrap();
        std::fs::write(good.join("1.png"), b"x").unwrap();
        let empty = dir.path().join("birds").join("robin");
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::write(empty.join("notes.txt"), b"x").unwrap();

        let config = MediaConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let cache = Arc::new(MediaCache::new(
            &config,
            Arc::new(CountingSync(AtomicUsize::new(0))),
        ));
        let catalog = Arc::new(ItemCatalog::from_pairs([("birds", "robin"), ("birds", "wren")]));
        let selector = MediaSelector::new(&config, cache, catalog);

        for _ in 0..5 {
            let served = selector.serve("chan").await.unwrap();
            assert_eq!(served.item, "wren");
            selector.mark_answered("chan");
        }
    }

    #[tokio::test]
    async fn test_failed_serve_moves_channel_past_item() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("birds").join("robin");
        std::fs::create_dir_all(&empty).unwrap();
        std::fs::write(empty.join("notes.txt"), b"x").unwrap();

        let config = MediaConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let cache = Arc::new(MediaCache::new(
            &config,
            Arc::new(CountingSync(AtomicUsize::new(0))),
        ));
        let catalog = Arc::new(ItemCatalog::from_pairs([("birds", "robin")]));
        let selector = MediaSelector::new(&config, cache, catalog);

        assert!(selector.serve("chan").await.is_err());
        let state = selector.states().get("chan");
        assert!(state.answered);
        assert_eq!(state.prev_item.as_deref(), Some("robin"));
    }
}
