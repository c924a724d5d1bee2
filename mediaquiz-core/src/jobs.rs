//! Status records for background save jobs, polled by submitters.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{MediaError, Result};
use crate::push::{Progress, ProgressPhase, ProgressReporter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    /// Push flag names reported by the remote
    Succeeded(Vec<String>),
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded(_) | JobState::Failed)
    }

    fn status_names(&self) -> Vec<String> {
        match self {
            JobState::Pending => vec!["PENDING".to_string()],
            JobState::Running => vec!["IN_PROGRESS".to_string()],
            JobState::Succeeded(flags) => flags.clone(),
            JobState::Failed => vec!["FAIL".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub state: JobState,
    /// Unix seconds
    pub start: i64,
    /// Unix seconds, 0 while running
    pub end: i64,
    pub phase: Vec<String>,
    pub items_done: u64,
    pub items_total: u64,
    pub message: String,
    finished_at: Option<Instant>,
}

impl JobRecord {
    fn new() -> Self {
        Self {
            state: JobState::Pending,
            start: Utc::now().timestamp(),
            end: 0,
            phase: Vec::new(),
            items_done: 0,
            items_total: 0,
            message: String::new(),
            finished_at: None,
        }
    }

    fn expired(&self, retention: Duration, now: Instant) -> bool {
        self.finished_at
            .map(|t| now.duration_since(t) >= retention)
            .unwrap_or(false)
    }

    pub fn to_status(&self) -> JobStatus {
        JobStatus {
            start: self.start,
            end: self.end,
            status: self.state.status_names(),
            phase: self.phase.clone(),
            items_done: self.items_done,
            items_total: self.items_total,
            message: self.message.clone(),
        }
    }
}

/// JSON view of a job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub start: i64,
    pub end: i64,
    pub status: Vec<String>,
    pub phase: Vec<String>,
    pub items_done: u64,
    pub items_total: u64,
    pub message: String,
}

/// One record per submitter. Terminal records disappear after `retention`.
pub struct JobStatusStore {
    records: DashMap<String, JobRecord>,
    retention: Duration,
}

impl JobStatusStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention,
        }
    }

    /// Start a job. Fails while the submitter's previous job is unfinished.
    pub fn begin(&self, submitter: &str) -> Result<JobStatus> {
        match self.records.entry(submitter.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().state.is_terminal() {
                    return Err(MediaError::JobAlreadyRunning {
                        submitter: submitter.to_string(),
                    });
                }
                occupied.insert(JobRecord::new());
                Ok(occupied.get().to_status())
            }
            Entry::Vacant(vacant) => {
                let record = vacant.insert(JobRecord::new());
                debug!(submitter, "Job record created");
                Ok(record.to_status())
            }
        }
    }

    pub fn mark_running(&self, submitter: &str) {
        if let Some(mut record) = self.records.get_mut(submitter) {
            if !record.state.is_terminal() {
                record.state = JobState::Running;
            }
        }
    }

    pub fn update_progress(&self, submitter: &str, progress: &Progress) {
        if let Some(mut record) = self.records.get_mut(submitter) {
            if record.state.is_terminal() {
                return;
            }
            record.state = JobState::Running;
            record.phase = ProgressPhase::names(progress.op_code);
            record.items_done = progress.items_done;
            record.items_total = progress.items_total;
            record.message = progress.message.clone();
        }
    }

    /// Move a job to a terminal state and start its expiry clock.
    pub fn complete(&self, submitter: &str, state: JobState) {
        if let Some(mut record) = self.records.get_mut(submitter) {
            record.end = Utc::now().timestamp();
            record.finished_at = Some(Instant::now());
            info!(submitter, status = ?state.status_names(), "Job finished");
            record.state = state;
        }
    }

    /// Remove a record outright, e.g. when a job could not be queued.
    pub fn abandon(&self, submitter: &str) {
        self.records.remove(submitter);
    }

    pub fn get(&self, submitter: &str) -> Option<JobStatus> {
        let now = Instant::now();
        {
            let record = self.records.get(submitter)?;
            if !record.expired(self.retention, now) {
                return Some(record.to_status());
            }
        }
        self.records
            .remove_if(submitter, |_, r| r.expired(self.retention, now));
        None
    }

    /// Drop expired terminal records.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, r| !r.expired(self.retention, now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Expired job records removed");
        }
        removed
    }

    pub fn reporter(self: &Arc<Self>, submitter: &str) -> Arc<dyn ProgressReporter> {
        Arc::new(JobProgress {
            store: self.clone(),
            submitter: submitter.to_string(),
        })
    }
}

/// Forwards push progress into a submitter's job record.
struct JobProgress {
    store: Arc<JobStatusStore>,
    submitter: String,
}

impl ProgressReporter for JobProgress {
    fn report(&self, progress: Progress) {
        self.store.update_progress(&self.submitter, &progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_while_running_fails() {
        let store = JobStatusStore::new(Duration::from_secs(60));
        let status = store.begin("u1").unwrap();
        assert_eq!(status.status, vec!["PENDING"]);
        assert_eq!(status.end, 0);

        store.mark_running("u1");
        assert!(matches!(
            store.begin("u1"),
            Err(MediaError::JobAlreadyRunning { .. })
        ));
        assert!(store.begin("u2").is_ok());
    }

    #[test]
    fn test_progress_and_completion() {
        let store = Arc::new(JobStatusStore::new(Duration::from_secs(60)));
        store.begin("u1").unwrap();

        store.reporter("u1").report(Progress {
            op_code: ProgressPhase::Writing as u16 | ProgressPhase::Begin as u16,
            items_done: 1,
            items_total: 4,
            message: "12 bytes".to_string(),
        });
        let status = store.get("u1").unwrap();
        assert_eq!(status.status, vec!["IN_PROGRESS"]);
        assert_eq!(status.phase, vec!["WRITING", "BEGIN"]);
        assert_eq!(status.items_total, 4);

        store.complete("u1", JobState::Succeeded(vec!["FAST_FORWARD".to_string()]));
        let status = store.get("u1").unwrap();
        assert_eq!(status.status, vec!["FAST_FORWARD"]);
        assert!(status.end > 0);

        // a finished job may be replaced
        assert!(store.begin("u1").is_ok());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let store = JobStatusStore::new(Duration::from_secs(60));
        let status = store.begin("u1").unwrap();
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("itemsDone").is_some());
        assert!(json.get("itemsTotal").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_expire_after_retention() {
        let store = JobStatusStore::new(Duration::from_secs(60));
        store.begin("u1").unwrap();
        store.complete("u1", JobState::Failed);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("u1").unwrap().status, vec!["FAIL"]);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("u1").is_none());

        store.begin("u2").unwrap();
        store.complete("u2", JobState::Failed);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.cleanup_expired(), 1);
    }
}
