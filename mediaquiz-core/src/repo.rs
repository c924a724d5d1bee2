//! Working copies of remote image collections.
//!
//! A [`RepositoryHandle`] owns one `(url, local dir)` pair for the lifetime of
//! the process. Every operation takes the directory lock, runs the git work on
//! the blocking pool and releases the lock on every exit path.
//!
//! A sync from any caller resets the working tree to the remote head, so a
//! change must be edited, committed and pushed inside one
//! [`RepositoryHandle::locked`] call.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use git2::build::RepoBuilder;
use git2::{
    Cred, CredentialType, FetchOptions, IndexAddOption, Oid, PackBuilderStage, PushOptions,
    RemoteCallbacks, Repository, ResetType, Signature, StatusOptions,
};
use tracing::{debug, info, instrument, warn};

use crate::config::{GitIdentity, MediaConfig};
use crate::error::{MediaError, Result};
use crate::lock::{DirectoryLock, LockGuard};
use crate::push::{Progress, ProgressPhase, ProgressReporter, PushFlag, PushFlags, PushResult};

/// Lifecycle of a working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    NotCloned,
    Clean,
    DirtyPendingPush,
}

impl RepoState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RepoState::Clean,
            2 => RepoState::DirtyPendingPush,
            _ => RepoState::NotCloned,
        }
    }
}

/// Anything that can bring a local collection up to date.
#[async_trait]
pub trait CollectionSync: Send + Sync {
    async fn sync(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct RepoSpec {
    name: String,
    url: String,
    dir: PathBuf,
    shallow: bool,
    identity: GitIdentity,
}

/// A local working copy of one remote repository.
#[derive(Debug)]
pub struct RepositoryHandle {
    spec: RepoSpec,
    lock: DirectoryLock,
    state: Arc<AtomicU8>,
    last_token: AtomicU64,
}

impl RepositoryHandle {
    /// Create a handle. Nothing touches the disk until the first call.
    ///
    /// `shallow` clones with depth 1; use it only for read-only handles.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        dir: impl Into<PathBuf>,
        shallow: bool,
        identity: GitIdentity,
        lock: DirectoryLock,
    ) -> Self {
        let dir = dir.into();
        let initial = if dir.join(".git").exists() {
            RepoState::Clean
        } else {
            RepoState::NotCloned
        };
        Self {
            spec: RepoSpec {
                name: name.into(),
                url: url.into(),
                dir,
                shallow,
                identity,
            },
            lock,
            state: Arc::new(AtomicU8::new(initial as u8)),
            last_token: AtomicU64::new(0),
        }
    }

    fn from_config(config: &MediaConfig, name: &str, url: &str, dir: &Path, shallow: bool) -> Self {
        let lock = DirectoryLock::new(dir, config.lock_timeout, config.lock_lease);
        Self::new(name, url, dir, shallow, config.git_identity.clone(), lock)
    }

    /// Read-only shallow copy of the canonical collection used for serving.
    pub fn for_cache(config: &MediaConfig) -> Self {
        Self::from_config(config, "cache", &config.canonical_repo_url, &config.cache_dir, true)
    }

    /// Pushable copy of the canonical collection.
    pub fn for_canonical(config: &MediaConfig) -> Self {
        Self::from_config(
            config,
            "canonical",
            &config.canonical_repo_url,
            &config.canonical_dir,
            false,
        )
    }

    /// Pushable copy of the staging collection.
    pub fn for_staging(config: &MediaConfig) -> Self {
        Self::from_config(config, "staging", &config.staging_repo_url, &config.staging_dir, false)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn dir(&self) -> &Path {
        &self.spec.dir
    }

    pub fn state(&self) -> RepoState {
        RepoState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Run `f` on the blocking pool while holding the directory lock.
    pub async fn locked<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WorkingCopy) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.lock.acquire().await?;
        let previous = self.last_token.swap(guard.token(), Ordering::SeqCst);
        if guard.token() <= previous {
            warn!(
                repo = %self.spec.name,
                token = guard.token(),
                previous,
                "Fencing token did not advance; lock file was reset"
            );
        }

        let mut copy = WorkingCopy {
            spec: self.spec.clone(),
            state: self.state.clone(),
            guard,
        };

        tokio::task::spawn_blocking(move || f(&mut copy))
            .await
            .map_err(MediaError::task_failed)?
    }

    /// Clone, or fetch and force-reset the working tree to the remote head.
    #[instrument(level = "debug", skip_all, fields(repo = %self.spec.name))]
    pub async fn sync(&self) -> Result<()> {
        self.locked(|copy| copy.sync()).await
    }

    /// Clone when there is no working copy yet. An existing copy is left as
    /// it is, so this is safe to call from read paths.
    #[instrument(level = "debug", skip_all, fields(repo = %self.spec.name))]
    pub async fn ensure_cloned(&self) -> Result<()> {
        self.locked(|copy| copy.ensure_cloned()).await
    }
}

#[async_trait]
impl CollectionSync for RepositoryHandle {
    async fn sync(&self) -> Result<()> {
        RepositoryHandle::sync(self).await
    }
}

/// A path a commit is expected to record, relative to the working copy root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(PathBuf),
    Removed(PathBuf),
}

/// A pushed commit and the per-reference outcome.
#[derive(Debug, Clone)]
pub struct Published {
    pub commit: String,
    pub results: Vec<PushResult>,
}

/// A working copy while its directory lock is held.
pub struct WorkingCopy {
    spec: RepoSpec,
    state: Arc<AtomicU8>,
    guard: LockGuard,
}

impl WorkingCopy {
    pub fn dir(&self) -> &Path {
        &self.spec.dir
    }

    pub fn token(&self) -> u64 {
        self.guard.token()
    }

    fn set_state(&self, state: RepoState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn sync(&mut self) -> Result<()> {
        let dir = self.spec.dir.clone();
        let result = if dir.join(".git").exists() {
            self.fetch_and_reset()
        } else {
            self.clone_fresh()
        };
        match result {
            Ok(()) => {
                self.set_state(RepoState::Clean);
                Ok(())
            }
            Err(MediaError::Git(e)) => {
                warn!(repo = %self.spec.name, error = %e, "Sync failed");
                Err(MediaError::sync_failure(dir, e))
            }
            Err(MediaError::Io(e)) => {
                warn!(repo = %self.spec.name, error = %e, "Sync failed");
                Err(MediaError::sync_failure(dir, e))
            }
            Err(other) => Err(other),
        }
    }

    pub fn ensure_cloned(&mut self) -> Result<()> {
        if self.spec.dir.join(".git").exists() {
            return Ok(());
        }
        self.sync()
    }

    fn clone_fresh(&self) -> Result<()> {
        if self.spec.dir.exists() {
            // leftover from an interrupted clone
            std::fs::remove_dir_all(&self.spec.dir)?;
        }
        if let Some(parent) = self.spec.dir.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(credential_callbacks(&self.spec.identity));
        if self.spec.shallow {
            fetch.depth(1);
        }

        RepoBuilder::new()
            .fetch_options(fetch)
            .clone(&self.spec.url, &self.spec.dir)?;

        info!(repo = %self.spec.name, dir = %self.spec.dir.display(), shallow = self.spec.shallow, "Cloned repository");
        Ok(())
    }

    fn fetch_and_reset(&self) -> Result<()> {
        let repo = Repository::open(&self.spec.dir)?;
        let branch = current_branch(&repo)?;

        {
            let mut remote = repo.find_remote("origin")?;
            let mut fetch = FetchOptions::new();
            fetch.remote_callbacks(credential_callbacks(&self.spec.identity));
            if self.spec.shallow {
                fetch.depth(1);
            }
            let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
            remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;
        }

        let head = repo.find_reference("FETCH_HEAD")?.peel_to_commit()?;
        repo.reset(head.as_object(), ResetType::Hard, None)?;
        let removed = remove_untracked(&repo, &self.spec.dir)?;

        debug!(
            repo = %self.spec.name,
            head = %head.id(),
            untracked_removed = removed,
            "Working tree reset to remote head"
        );
        Ok(())
    }

    pub fn commit_all(&mut self, message: &str) -> Result<Option<String>> {
        let repo = Repository::open(&self.spec.dir)?;

        let mut index = repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                debug!(repo = %self.spec.name, "Nothing to commit");
                return Ok(None);
            }
        }

        let tree = repo.find_tree(tree_id)?;
        let signature = Signature::now(&self.spec.identity.name, &self.spec.identity.email)?;
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        self.set_state(RepoState::DirtyPendingPush);
        info!(repo = %self.spec.name, commit = %oid, "Committed changes");
        Ok(Some(oid.to_string()))
    }

    /// Commit every change and push it.
    ///
    /// Fails with [`MediaError::ChangesNotCommitted`] when any of `expected`
    /// is not reflected in `HEAD` afterwards, for instance because the tree
    /// was reset or the path is ignored. Returns `None` when there was nothing
    /// to commit and `HEAD` already matches.
    pub fn publish(
        &mut self,
        message: &str,
        expected: &[Change],
        progress: &dyn ProgressReporter,
    ) -> Result<Option<Published>> {
        let commit = self.commit_all(message)?;

        let unrecorded = self.unrecorded(expected)?;
        if unrecorded > 0 {
            warn!(repo = %self.spec.name, unrecorded, "Changes missing from commit");
            return Err(MediaError::ChangesNotCommitted {
                repo: self.spec.name.clone(),
                count: unrecorded,
            });
        }

        let Some(commit) = commit else {
            return Ok(None);
        };
        let results = self.push(progress)?;
        Ok(Some(Published { commit, results }))
    }

    fn unrecorded(&self, expected: &[Change]) -> Result<usize> {
        let repo = Repository::open(&self.spec.dir)?;
        let tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None,
        };
        let in_head = |path: &Path| {
            tree.as_ref()
                .map(|t| t.get_path(path).is_ok())
                .unwrap_or(false)
        };
        Ok(expected
            .iter()
            .filter(|change| match change {
                Change::Added(path) => !in_head(path.as_path()),
                Change::Removed(path) => in_head(path.as_path()),
            })
            .count())
    }

    /// Push the current branch to `origin`.
    ///
    /// Transport errors are logged and yield an empty result; callers treat
    /// an empty result as a failed push.
    pub fn push(&mut self, progress: &dyn ProgressReporter) -> Result<Vec<PushResult>> {
        self.guard.ensure_current()?;

        let repo = Repository::open(&self.spec.dir)?;
        let branch = current_branch(&repo)?;
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");

        let negotiated: RefCell<BTreeMap<String, PushFlags>> = RefCell::new(BTreeMap::new());
        let statuses: RefCell<BTreeMap<String, Option<String>>> = RefCell::new(BTreeMap::new());

        let outcome = {
            let mut callbacks = credential_callbacks(&self.spec.identity);
            callbacks.push_negotiation(|updates| {
                let mut negotiated = negotiated.borrow_mut();
                for update in updates {
                    let name = update
                        .dst_refname()
                        .or_else(|| update.src_refname())
                        .unwrap_or_default()
                        .to_string();
                    let flags = classify_update(&repo, &name, update.src(), update.dst());
                    negotiated.insert(name, flags);
                }
                Ok(())
            });
            callbacks.push_update_reference(|refname, status| {
                statuses
                    .borrow_mut()
                    .insert(refname.to_string(), status.map(str::to_string));
                Ok(())
            });
            callbacks.pack_progress(|stage, current, total| {
                let phase = match stage {
                    PackBuilderStage::AddingObjects => ProgressPhase::Counting,
                    PackBuilderStage::Deltafication => ProgressPhase::Compressing,
                };
                progress.report(phase_progress(phase, current, total, String::new()));
            });
            callbacks.push_transfer_progress(|current, total, bytes| {
                progress.report(phase_progress(
                    ProgressPhase::Writing,
                    current,
                    total,
                    format!("{bytes} bytes"),
                ));
            });

            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            let mut remote = repo.find_remote("origin")?;
            remote.push(&[refspec.as_str()], Some(&mut options))
        };

        if let Err(e) = outcome {
            warn!(repo = %self.spec.name, error = %e, "Push transport failed");
            return Ok(Vec::new());
        }

        let negotiated = negotiated.into_inner();
        let statuses = statuses.into_inner();
        let results = collect_results(&negotiated, &statuses);

        if !results.is_empty() && results.iter().all(|r| !r.flags.is_failure()) {
            self.set_state(RepoState::Clean);
        }
        info!(
            repo = %self.spec.name,
            refs = results.len(),
            flags = ?results.iter().map(|r| r.flags.names()).collect::<Vec<_>>(),
            "Push finished"
        );
        Ok(results)
    }
}

fn credential_callbacks<'a>(identity: &GitIdentity) -> RemoteCallbacks<'a> {
    let username = identity.username.clone();
    let token = identity.token.clone();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            if let Some(token) = &token {
                let user = username
                    .as_deref()
                    .or(username_from_url)
                    .unwrap_or("git");
                return Cred::userpass_plaintext(user, token);
            }
        }
        Cred::default()
    });
    callbacks
}

fn current_branch(repo: &Repository) -> Result<String> {
    if let Ok(head) = repo.head() {
        if let Some(name) = head.shorthand() {
            return Ok(name.to_string());
        }
    }
    // unborn HEAD still names its branch symbolically
    let head = repo.find_reference("HEAD")?;
    let target = head
        .symbolic_target()
        .and_then(|t| t.strip_prefix("refs/heads/"))
        .unwrap_or("main");
    Ok(target.to_string())
}

fn remove_untracked(repo: &Repository, dir: &Path) -> Result<usize> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(false)
        .include_ignored(false);

    let mut removed = 0;
    for entry in repo.statuses(Some(&mut options))?.iter() {
        if !entry.status().contains(git2::Status::WT_NEW) {
            continue;
        }
        let Some(rel) = entry.path() else { continue };
        let path = dir.join(rel);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

fn classify_update(repo: &Repository, refname: &str, old: Oid, new: Oid) -> PushFlags {
    let flag = if old.is_zero() {
        if refname.starts_with("refs/tags/") {
            PushFlag::NewTag
        } else {
            PushFlag::NewHead
        }
    } else if new.is_zero() {
        PushFlag::Deleted
    } else if old == new {
        PushFlag::UpToDate
    } else if repo.graph_descendant_of(new, old).unwrap_or(false) {
        PushFlag::FastForward
    } else {
        PushFlag::ForcedUpdate
    };
    flag.into()
}

fn collect_results(
    negotiated: &BTreeMap<String, PushFlags>,
    statuses: &BTreeMap<String, Option<String>>,
) -> Vec<PushResult> {
    let mut results = Vec::new();
    for (reference, status) in statuses {
        let mut flags = negotiated
            .get(reference)
            .copied()
            .unwrap_or_else(|| PushFlag::UpToDate.into());
        let summary = match status {
            None => String::new(),
            Some(message) => {
                flags = PushFlags::default();
                if message.contains("remote") || message.contains("hook") {
                    flags.insert(PushFlag::RemoteRejected);
                } else {
                    flags.insert(PushFlag::Rejected);
                }
                message.clone()
            }
        };
        results.push(PushResult {
            reference: reference.clone(),
            flags,
            summary,
        });
    }
    results
}

fn phase_progress(phase: ProgressPhase, current: usize, total: usize, message: String) -> Progress {
    let mut op_code = phase as u16;
    if current == 0 {
        op_code |= ProgressPhase::Begin as u16;
    }
    if total > 0 && current >= total {
        op_code |= ProgressPhase::End as u16;
    }
    Progress {
        op_code,
        items_done: current as u64,
        items_total: total as u64,
        message,
    }
}
