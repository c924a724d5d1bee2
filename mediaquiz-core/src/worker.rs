//! Single background worker and periodic schedules.
//!
//! Save jobs and promotion runs share one queue so that at most one of them
//! touches the staging working copy at a time. Submitters never wait on the
//! worker; they poll the [`JobStatusStore`](crate::jobs::JobStatusStore).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{MediaError, Result};
use crate::promotion::{PromotionTask, SaveUploads};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    SaveUploads {
        submitter: String,
        display_name: String,
    },
    Promote,
}

/// Sending half of the worker queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue without waiting. Fails when the queue is full or the worker
    /// has stopped.
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MediaError::TaskFailed("job queue full".into()),
            mpsc::error::TrySendError::Closed(_) => {
                MediaError::TaskFailed("background worker stopped".into())
            }
        })
    }
}

/// Start the worker. It runs until every [`JobQueue`] clone is dropped.
pub fn spawn_worker(
    save: Arc<SaveUploads>,
    promotion: Arc<PromotionTask>,
    capacity: usize,
) -> (JobQueue, JoinHandle<()>) {
    let (queue, mut rx) = JobQueue::channel(capacity);
    let handle = tokio::spawn(async move {
        info!("Background worker started");
        while let Some(job) = rx.recv().await {
            run_job(&save, &promotion, job).await;
        }
        info!("Background worker stopped");
    });
    (queue, handle)
}

async fn run_job(save: &SaveUploads, promotion: &PromotionTask, job: Job) {
    debug!(?job, "Running job");
    match job {
        Job::SaveUploads {
            submitter,
            display_name,
        } => {
            if let Err(e) = save.run(&submitter, &display_name).await {
                error!(submitter = %submitter, error = %e, "Save job aborted");
            }
        }
        Job::Promote => match promotion.run_once().await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(failed = ?report.failed, "Promotion left unpushed changes")
            }
            Ok(report) => debug!(added = report.added, rejected = report.rejected, "Promotion run done"),
            Err(e) => error!(error = %e, "Promotion run failed"),
        },
    }
}

/// Run `task` every `period`, starting one period from now.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, task: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        tick.tick().await;
        loop {
            tick.tick().await;
            debug!(task = name, "Periodic task firing");
            task().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_submit_after_worker_gone_fails() {
        let (queue, rx) = JobQueue::channel(1);
        drop(rx);
        assert!(matches!(queue.submit(Job::Promote), Err(MediaError::TaskFailed(_))));
    }

    #[tokio::test]
    async fn test_submit_to_full_queue_fails() {
        let (queue, mut rx) = JobQueue::channel(1);
        queue.submit(Job::Promote).unwrap();
        assert!(queue.submit(Job::Promote).is_err());
        assert_eq!(rx.recv().await, Some(Job::Promote));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_waits_one_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let handle = spawn_periodic("count", Duration::from_secs(10), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        handle.abort();
    }
}
