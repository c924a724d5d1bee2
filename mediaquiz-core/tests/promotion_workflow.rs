//! End-to-end promotion and save scenarios against local bare repositories.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use git2::{Repository, RepositoryInitOptions, Signature};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tempfile::TempDir;
use tokio::sync::Mutex;

use mediaquiz_core::push::NoProgress;
use mediaquiz_core::{
    Change, ContentHash, Decision, GitIdentity, InMemoryManifests, ItemCatalog, JobState,
    JobStatusStore, MediaConfig, MediaError, Notification, Notifier, PromotionTask,
    RepositoryHandle, ReviewQueue, SaveUploads, StageOutcome, Upload, UploadIndex, UploadStaging,
    VerificationTally,
};

/// Keeps every notification for later assertions.
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self::default()
    }

    async fn events(&self) -> Vec<Notification> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) {
        self.events.lock().await.push(notification);
    }
}

fn png(seed: u8) -> Vec<u8> {
    let img = ImageBuffer::from_fn(48, 48, |x, y| {
        let v = ((x as u16 * (seed as u16 + 3) + y as u16 * 7) % 256) as u8;
        Rgb([v, v.wrapping_add(seed), 255 - v])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn id_of(data: &[u8]) -> String {
    ContentHash::from_bytes(data).to_hex()
}

/// Bare repository on branch `main` holding `files`.
fn seed_remote(root: &Path, name: &str, files: &[(String, Vec<u8>)]) -> PathBuf {
    let remote = root.join(format!("{name}.git"));
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    Repository::init_opts(&remote, &opts).unwrap();

    let seed_dir = root.join(format!("{name}-seed"));
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(&seed_dir, &opts).unwrap();

    std::fs::write(seed_dir.join("README.md"), format!("# {name}\n")).unwrap();
    for (path, data) in files {
        let full = seed_dir.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, data).unwrap();
    }

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("seed", "seed@example.test").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();

    let mut origin = repo.remote("origin", remote.to_str().unwrap()).unwrap();
    origin
        .push(&["refs/heads/main:refs/heads/main"], None)
        .unwrap();
    remote
}

fn remote_has(remote: &Path, path: &str) -> bool {
    let repo = Repository::open_bare(remote).unwrap();
    let tree = repo
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_tree()
        .unwrap();
    tree.get_path(Path::new(path)).is_ok()
}

fn remote_head_message(remote: &Path) -> String {
    let repo = Repository::open_bare(remote).unwrap();
    let commit = repo
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    commit.message().unwrap_or_default().to_string()
}

struct Fixture {
    dir: TempDir,
    config: MediaConfig,
    canonical_remote: PathBuf,
    staging_remote: PathBuf,
}

impl Fixture {
    fn new(staged: &[(String, Vec<u8>)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let canonical_remote = seed_remote(dir.path(), "canonical", &[]);
        let staging_remote = seed_remote(dir.path(), "staging", staged);

        let config = MediaConfig {
            canonical_repo_url: canonical_remote.to_string_lossy().into_owned(),
            canonical_dir: dir.path().join("work/canonical"),
            cache_dir: dir.path().join("work/cache"),
            staging_repo_url: staging_remote.to_string_lossy().into_owned(),
            staging_dir: dir.path().join("work/staging"),
            staging_subdir: "images".to_string(),
            upload_dir: dir.path().join("work/uploads"),
            commit_url_formats: [
                "https://example.test/canonical/commit/{id}".to_string(),
                "https://example.test/staging/commit/{id}".to_string(),
            ],
            git_identity: GitIdentity {
                name: "mediaquiz".to_string(),
                email: "bot@example.test".to_string(),
                username: None,
                token: None,
            },
            lock_timeout: Duration::from_secs(5),
            ..MediaConfig::default()
        };

        Self {
            dir,
            config,
            canonical_remote,
            staging_remote,
        }
    }

    fn catalog() -> Arc<ItemCatalog> {
        Arc::new(ItemCatalog::from_pairs([("birds", "robin"), ("birds", "wren")]))
    }

    fn promotion(
        &self,
        tally: Arc<VerificationTally>,
        notifier: Arc<RecordingNotifier>,
    ) -> (PromotionTask, Arc<RepositoryHandle>, Arc<RepositoryHandle>) {
        let canonical = Arc::new(RepositoryHandle::for_canonical(&self.config));
        let staging = Arc::new(RepositoryHandle::for_staging(&self.config));
        let task = PromotionTask::new(
            &self.config,
            canonical.clone(),
            staging.clone(),
            Self::catalog(),
            tally,
            notifier,
        );
        (task, canonical, staging)
    }

    fn save(
        &self,
        staging: Arc<RepositoryHandle>,
        uploads: Arc<UploadStaging>,
        jobs: Arc<JobStatusStore>,
        notifier: Arc<RecordingNotifier>,
    ) -> SaveUploads {
        SaveUploads::new(&self.config, staging, uploads, jobs, notifier)
    }
}

fn vote_n(tally: &VerificationTally, id: &str, decision: Decision, n: usize) {
    for voter in 0..n {
        tally.vote(id, &format!("voter-{voter}"), decision).unwrap();
    }
}

#[tokio::test]
async fn test_verified_image_is_promoted() {
    let good = png(1);
    let bad = png(2);
    let good_id = id_of(&good);
    let bad_id = id_of(&bad);
    let fixture = Fixture::new(&[
        (format!("images/robin/{good_id}.png"), good.clone()),
        (format!("images/wren/{bad_id}.png"), bad.clone()),
    ]);

    let tally = Arc::new(VerificationTally::new());
    let notifier = Arc::new(RecordingNotifier::new());
    vote_n(&tally, &good_id, Decision::Valid, 3);
    vote_n(&tally, &bad_id, Decision::Invalid, 3);

    let (task, _, _) = fixture.promotion(tally.clone(), notifier.clone());
    let report = task.run_once().await.unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.items, vec!["robin".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(report.urls.len(), 2);
    assert!(report.urls[0].starts_with("https://example.test/canonical/commit/"));

    assert!(remote_has(
        &fixture.canonical_remote,
        &format!("birds/robin/{good_id}.png")
    ));
    assert!(!remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{good_id}.png")
    ));
    assert!(!remote_has(
        &fixture.staging_remote,
        &format!("images/wren/{bad_id}.png")
    ));
    assert!(!remote_has(
        &fixture.canonical_remote,
        &format!("birds/wren/{bad_id}.png")
    ));

    assert!(tally.is_empty());
    let events = notifier.events().await;
    assert!(events.iter().any(|e| matches!(
        e,
        Notification::Promoted { added: 1, rejected: 1, .. }
    )));
}

#[tokio::test]
async fn test_duplicate_votes_remove_image_without_promoting() {
    let dup = png(3);
    let dup_id = id_of(&dup);
    let fixture = Fixture::new(&[(format!("images/robin/{dup_id}.png"), dup)]);

    let tally = Arc::new(VerificationTally::new());
    let notifier = Arc::new(RecordingNotifier::new());
    vote_n(&tally, &dup_id, Decision::Valid, 3);
    // three duplicate votes outweigh three valid ones
    for voter in ["d1", "d2", "d3"] {
        tally.vote(&dup_id, voter, Decision::Duplicate).unwrap();
    }

    let (task, _, _) = fixture.promotion(tally.clone(), notifier);
    let report = task.run_once().await.unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.rejected, 1);
    assert!(!remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{dup_id}.png")
    ));
    assert!(!remote_has(
        &fixture.canonical_remote,
        &format!("birds/robin/{dup_id}.png")
    ));
    assert!(tally.is_empty());
}

#[tokio::test]
async fn test_undecided_images_stay_staged() {
    let img = png(4);
    let id = id_of(&img);
    let fixture = Fixture::new(&[(format!("images/robin/{id}.png"), img)]);

    let tally = Arc::new(VerificationTally::new());
    vote_n(&tally, &id, Decision::Valid, 2);

    let (task, _, _) = fixture.promotion(tally.clone(), Arc::new(RecordingNotifier::new()));
    let report = task.run_once().await.unwrap();

    assert!(!report.changed());
    assert!(remote_has(&fixture.staging_remote, &format!("images/robin/{id}.png")));
    assert_eq!(tally.stats(&id).valid, 2);
}

#[tokio::test]
async fn test_failed_canonical_push_keeps_votes_and_staging() {
    let img = png(5);
    let id = id_of(&img);
    let fixture = Fixture::new(&[(format!("images/robin/{id}.png"), img)]);

    let tally = Arc::new(VerificationTally::new());
    let notifier = Arc::new(RecordingNotifier::new());
    vote_n(&tally, &id, Decision::Valid, 3);

    let (task, canonical, _) = fixture.promotion(tally.clone(), notifier.clone());
    canonical.sync().await.unwrap();
    let unreachable = fixture.dir.path().join("gone.git");
    Repository::open(canonical.dir())
        .unwrap()
        .remote_set_pushurl("origin", unreachable.to_str())
        .unwrap();

    let report = task.run_once().await.unwrap();
    assert_eq!(report.failed, vec!["canonical".to_string()]);
    assert_eq!(tally.stats(&id).valid, 3);
    assert!(remote_has(&fixture.staging_remote, &format!("images/robin/{id}.png")));

    let events = notifier.events().await;
    assert!(events.iter().any(|e| matches!(e, Notification::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, Notification::Promoted { .. })));
}

#[tokio::test]
async fn test_save_job_pushes_uploads_to_staging() {
    let fixture = Fixture::new(&[]);
    let catalog = Fixture::catalog();
    let uploads = Arc::new(UploadStaging::new(&fixture.config, catalog));
    let jobs = Arc::new(JobStatusStore::new(Duration::from_secs(60)));
    let notifier = Arc::new(RecordingNotifier::new());
    let staging = Arc::new(RepositoryHandle::for_staging(&fixture.config));

    let data = png(6);
    let outcome = uploads
        .stage_upload(
            "u42",
            "robin",
            Upload {
                filename: "robin.png".to_string(),
                content_type: "image/png".to_string(),
                bytes: data.clone(),
            },
            &UploadIndex::default(),
        )
        .await
        .unwrap();
    let StageOutcome::Accepted { id, .. } = outcome else {
        panic!("upload was not accepted: {outcome:?}");
    };
    assert_eq!(id, id_of(&data));

    let save = SaveUploads::new(
        &fixture.config,
        staging,
        uploads.clone(),
        jobs.clone(),
        notifier.clone(),
    );
    jobs.begin("u42").unwrap();
    let state = save.run("u42", "Alice").await.unwrap();

    assert!(matches!(state, JobState::Succeeded(_)));
    let status = jobs.get("u42").unwrap();
    assert!(status.end > 0);
    assert_ne!(status.status, vec!["FAIL".to_string()]);

    assert!(remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{id}.png")
    ));
    assert!(remote_head_message(&fixture.staging_remote).starts_with("add images: id-u42"));
    assert!(uploads.list_staged("u42").await.unwrap().is_empty());

    let events = notifier.events().await;
    assert!(matches!(
        events.as_slice(),
        [Notification::Added { count: 1, .. }]
    ));
}

#[tokio::test]
async fn test_save_without_uploads_fails_job() {
    let fixture = Fixture::new(&[]);
    let uploads = Arc::new(UploadStaging::new(&fixture.config, Fixture::catalog()));
    let jobs = Arc::new(JobStatusStore::new(Duration::from_secs(60)));
    let save = SaveUploads::new(
        &fixture.config,
        Arc::new(RepositoryHandle::for_staging(&fixture.config)),
        uploads,
        jobs.clone(),
        Arc::new(RecordingNotifier::new()),
    );

    jobs.begin("nobody").unwrap();
    assert_eq!(save.run("nobody", "Nobody").await.unwrap(), JobState::Failed);
    assert_eq!(jobs.get("nobody").unwrap().status, vec!["FAIL".to_string()]);
}

async fn stage_png(uploads: &UploadStaging, submitter: &str, item: &str, data: &[u8]) -> String {
    let outcome = uploads
        .stage_upload(
            submitter,
            item,
            Upload {
                filename: format!("{item}.png"),
                content_type: "image/png".to_string(),
                bytes: data.to_vec(),
            },
            &UploadIndex::default(),
        )
        .await
        .unwrap();
    let StageOutcome::Accepted { id, .. } = outcome else {
        panic!("upload was not accepted: {outcome:?}");
    };
    id
}

/// Resets the staging working copy a few times, like a refresh from another
/// caller would.
async fn keep_syncing(staging: &RepositoryHandle, rounds: usize) {
    for _ in 0..rounds {
        staging.sync().await.unwrap();
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_save_job_survives_concurrent_syncs() {
    let fixture = Fixture::new(&[]);
    let uploads = Arc::new(UploadStaging::new(&fixture.config, Fixture::catalog()));
    let jobs = Arc::new(JobStatusStore::new(Duration::from_secs(60)));
    let staging = Arc::new(RepositoryHandle::for_staging(&fixture.config));
    staging.sync().await.unwrap();

    let id = stage_png(&uploads, "u7", "wren", &png(7)).await;
    let save = fixture.save(
        staging.clone(),
        uploads.clone(),
        jobs.clone(),
        Arc::new(RecordingNotifier::new()),
    );

    jobs.begin("u7").unwrap();
    let (state, ()) = tokio::join!(save.run("u7", "Bob"), keep_syncing(&staging, 8));

    let JobState::Succeeded(flags) = state.unwrap() else {
        panic!("save job did not succeed");
    };
    assert!(!flags.contains(&"UP_TO_DATE".to_string()));
    assert!(remote_has(
        &fixture.staging_remote,
        &format!("images/wren/{id}.png")
    ));
    assert!(uploads.list_staged("u7").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_promotion_survives_concurrent_syncs() {
    let img = png(8);
    let id = id_of(&img);
    let fixture = Fixture::new(&[(format!("images/robin/{id}.png"), img)]);

    let tally = Arc::new(VerificationTally::new());
    vote_n(&tally, &id, Decision::Valid, 3);

    let (task, _, staging) = fixture.promotion(tally.clone(), Arc::new(RecordingNotifier::new()));
    staging.sync().await.unwrap();

    let (report, ()) = tokio::join!(task.run_once(), keep_syncing(&staging, 8));
    let report = report.unwrap();

    assert!(report.failed.is_empty());
    assert_eq!(report.added, 1);
    assert!(remote_has(
        &fixture.canonical_remote,
        &format!("birds/robin/{id}.png")
    ));
    assert!(!remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{id}.png")
    ));
    assert!(tally.is_empty());
}

#[tokio::test]
async fn test_review_leaves_uncommitted_changes_alone() {
    let fixture = Fixture::new(&[]);
    let staging = Arc::new(RepositoryHandle::for_staging(&fixture.config));
    staging.sync().await.unwrap();

    let data = png(9);
    let id = id_of(&data);
    let rel = PathBuf::from(format!("images/robin/{id}.png"));
    let target = staging.dir().join(&rel);
    {
        let target = target.clone();
        staging
            .locked(move |_| {
                std::fs::create_dir_all(target.parent().unwrap())?;
                std::fs::write(&target, data)?;
                Ok(())
            })
            .await
            .unwrap();
    }

    let review = ReviewQueue::new(
        &fixture.config,
        staging.clone(),
        Arc::new(InMemoryManifests::new()),
        Arc::new(VerificationTally::new()),
        Arc::new(RecordingNotifier::new()),
    );
    let next = review.next_unseen("reviewer", 0).await.unwrap().unwrap();
    assert_eq!(next.id, id);
    assert!(target.exists());

    let published = staging
        .locked(move |copy| copy.publish("add images", &[Change::Added(rel)], &NoProgress))
        .await
        .unwrap();
    assert!(published.is_some());
    assert!(remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{id}.png")
    ));
}

#[tokio::test]
async fn test_change_lost_to_reset_is_reported() {
    let fixture = Fixture::new(&[]);
    let staging = Arc::new(RepositoryHandle::for_staging(&fixture.config));
    staging.sync().await.unwrap();

    let rel = PathBuf::from("images/robin/lost.png");
    {
        let target = staging.dir().join(&rel);
        staging
            .locked(move |_| {
                std::fs::create_dir_all(target.parent().unwrap())?;
                std::fs::write(&target, png(10))?;
                Ok(())
            })
            .await
            .unwrap();
    }
    staging.sync().await.unwrap();

    let err = staging
        .locked(move |copy| copy.publish("add images", &[Change::Added(rel)], &NoProgress))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MediaError::ChangesNotCommitted { count: 1, .. }
    ));
}

#[tokio::test]
async fn test_ignored_upload_fails_save_and_keeps_upload() {
    let fixture = Fixture::new(&[(".gitignore".to_string(), b"images/\n".to_vec())]);
    let uploads = Arc::new(UploadStaging::new(&fixture.config, Fixture::catalog()));
    let jobs = Arc::new(JobStatusStore::new(Duration::from_secs(60)));
    let notifier = Arc::new(RecordingNotifier::new());
    let staging = Arc::new(RepositoryHandle::for_staging(&fixture.config));

    let id = stage_png(&uploads, "u11", "robin", &png(11)).await;
    let save = fixture.save(staging, uploads.clone(), jobs.clone(), notifier.clone());

    jobs.begin("u11").unwrap();
    assert_eq!(save.run("u11", "Carol").await.unwrap(), JobState::Failed);

    assert!(!remote_has(
        &fixture.staging_remote,
        &format!("images/robin/{id}.png")
    ));
    assert_eq!(uploads.list_staged("u11").await.unwrap().images.len(), 1);
    let events = notifier.events().await;
    assert!(events.iter().any(|e| matches!(e, Notification::Error { .. })));
    assert!(!events.iter().any(|e| matches!(e, Notification::Added { .. })));
}
