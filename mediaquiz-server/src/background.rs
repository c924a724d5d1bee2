//! Periodic background schedules
//!
//! Promotion runs are not executed here; they are queued onto the worker so
//! that they never overlap a save job.

use std::sync::Arc;

use mediaquiz_core::{spawn_periodic, Job, MediaConfig};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::Services;

/// Start every periodic task. Dropping the handles does not stop them;
/// abort them on shutdown.
pub fn spawn_schedules(config: &MediaConfig, services: &Services) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(4);

    let queue = services.state.queue.clone();
    handles.push(spawn_periodic(
        "promotion",
        config.promotion_interval,
        move || {
            let queue = queue.clone();
            async move {
                if let Err(e) = queue.submit(Job::Promote) {
                    warn!(error = %e, "Could not queue promotion run");
                }
            }
        },
    ));

    let selector = Arc::clone(&services.selector);
    handles.push(spawn_periodic(
        "eviction",
        config.eviction_interval,
        move || {
            let selector = selector.clone();
            async move {
                match selector.sweep().await {
                    Ok(items) if !items.is_empty() => info!(?items, "Evicted cached items"),
                    Ok(_) => debug!("Nothing to evict"),
                    Err(e) => error!(error = %e, "Cache eviction failed"),
                }
            }
        },
    ));

    let cache_repo = Arc::clone(&services.cache_repo);
    handles.push(spawn_periodic(
        "cache-refresh",
        config.cache_refresh_interval,
        move || {
            let cache_repo = cache_repo.clone();
            async move {
                match cache_repo.sync().await {
                    Ok(()) => info!("Canonical cache refreshed"),
                    Err(e) => error!(error = %e, "Canonical cache refresh failed"),
                }
            }
        },
    ));

    let jobs = Arc::clone(&services.state.jobs);
    handles.push(spawn_periodic(
        "job-cleanup",
        config.job_retention,
        move || {
            let jobs = jobs.clone();
            async move {
                let removed = jobs.cleanup_expired();
                if removed > 0 {
                    debug!(removed, "Expired job records removed");
                }
            }
        },
    ));

    info!(
        promotion = ?config.promotion_interval,
        eviction = ?config.eviction_interval,
        cache_refresh = ?config.cache_refresh_interval,
        "Background schedules started"
    );
    handles
}
