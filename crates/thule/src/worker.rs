use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use thule_core::{EventType, MergeRequestEvent, Planner};
use thule_forge::MergeRequestReader;
use thule_queue::{Job, JobQueue};
use thule_repo::Syncer;
use thule_store::RunStore;

const MAINTAIN_INTERVAL: Duration = Duration::from_secs(3600);

pub struct WorkerDeps {
    pub jobs: Arc<dyn JobQueue>,
    pub syncer: Arc<Syncer>,
    pub merge_requests: Option<Arc<dyn MergeRequestReader>>,
    pub planner: Planner,
    pub runs: Arc<dyn RunStore>,
    pub repo_root: PathBuf,
    pub default_base_ref: String,
}

/// The planner worker loop: blocking-dequeue, sync the clone, resolve
/// changed files, plan. A failed job never terminates the worker; only
/// cancellation (or a dead queue backend) does.
pub async fn run_worker(cancel: CancellationToken, deps: WorkerDeps) {
    loop {
        let job = match deps.jobs.dequeue(&cancel).await {
            Ok(job) => job,
            Err(err) => {
                info!(error = %err, "worker exiting");
                return;
            }
        };
        let event_type = match job.event_type.parse::<EventType>() {
            Ok(event_type) => event_type,
            Err(err) => {
                warn!(delivery = %job.delivery_id, error = %err, "skipping malformed job");
                continue;
            }
        };

        if deps.syncer.enabled() {
            if let Err(err) = deps.syncer.sync(&job.head_sha).await {
                warn!(
                    delivery = %job.delivery_id,
                    mr = job.merge_request_id,
                    sha = %job.head_sha,
                    error = %err,
                    "repo sync failed"
                );
                continue;
            }
        }

        // Replay the admission observation into this process's run store:
        // jobs arrive in admission order, so the dequeued SHA is the newest
        // this worker has seen for the merge request.
        deps.runs
            .set_latest_sha(job.merge_request_id, &job.head_sha);

        let changed_files = resolve_changed_files(&deps, &job).await;
        let event = MergeRequestEvent {
            delivery_id: job.delivery_id.clone(),
            event_type,
            repository: job.repository.clone(),
            merge_request_id: job.merge_request_id,
            head_sha: job.head_sha.clone(),
            base_ref: job.base_ref.clone(),
            changed_files,
        };
        match deps.planner.plan_for_event(&event).await {
            Ok(()) => info!(
                delivery = %job.delivery_id,
                mr = job.merge_request_id,
                sha = %job.head_sha,
                "plan completed"
            ),
            Err(err) => warn!(
                delivery = %job.delivery_id,
                mr = job.merge_request_id,
                sha = %job.head_sha,
                error = %err,
                "plan failed"
            ),
        }
    }
}

/// Periodic clone housekeeping alongside the worker loop.
pub async fn run_maintenance(cancel: CancellationToken, syncer: Arc<Syncer>) {
    let mut interval = tokio::time::interval(MAINTAIN_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if let Err(err) = syncer.maintain().await {
            warn!(error = %err, "repo maintenance failed");
        }
    }
}

/// Changed-file precedence: the webhook-supplied list wins, then the forge
/// merge-request reader, then a git diff of merge-base(base, head)..head.
async fn resolve_changed_files(deps: &WorkerDeps, job: &Job) -> Vec<String> {
    if !job.changed_files.is_empty() {
        return job.changed_files.clone();
    }

    if let Some(reader) = &deps.merge_requests {
        match reader.changed_files(job.merge_request_id).await {
            Ok(files) if !files.is_empty() => return files,
            Ok(_) => {}
            Err(err) => warn!(
                mr = job.merge_request_id,
                error = %err,
                "forge changed-files lookup failed"
            ),
        }
    }

    let base_ref = job
        .base_ref
        .clone()
        .filter(|base| !base.is_empty())
        .unwrap_or_else(|| deps.default_base_ref.clone());
    match git_changed_files(&deps.repo_root, &base_ref, &job.head_sha) {
        Ok(files) => files,
        Err(err) => {
            warn!(
                delivery = %job.delivery_id,
                mr = job.merge_request_id,
                base = %base_ref,
                sha = %job.head_sha,
                error = %err,
                "diff files failed"
            );
            Vec::new()
        }
    }
}

fn git_changed_files(
    repo_root: &Path,
    base_ref: &str,
    head_sha: &str,
) -> Result<Vec<String>, thule_repo::RepoError> {
    thule_repo::changed_files(repo_root, base_ref, head_sha)
}

#[cfg(test)]
mod tests {
    use super::*;

    use thule_core::{BuiltinEvaluator, MemoryClusterReader};
    use thule_forge::{CommentStore, MemoryCommentStore, MemoryStatusPublisher, StatusPublisher};
    use thule_queue::MemoryQueue;
    use thule_store::{MemoryRunStore, RunStore};

    fn job(delivery: &str, changed: &[&str]) -> Job {
        Job {
            delivery_id: delivery.to_string(),
            event_type: "merge_request.updated".to_string(),
            repository: "org/repo".to_string(),
            merge_request_id: 42,
            head_sha: "abc".to_string(),
            base_ref: None,
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn worker_plans_jobs_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("apps/payments");
        std::fs::create_dir_all(base.join("manifests")).unwrap();
        std::fs::write(
            base.join("thule.conf"),
            "version: v1\nproject: payments\nclusterRef: prod\nnamespace: payments\nrender:\n  mode: yaml\n  path: manifests\n",
        )
        .unwrap();
        std::fs::write(
            base.join("manifests/deploy.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: payments\n",
        )
        .unwrap();

        let jobs = Arc::new(MemoryQueue::new(8));
        let comments = Arc::new(MemoryCommentStore::new());
        let status = Arc::new(MemoryStatusPublisher::new());
        let runs = Arc::new(MemoryRunStore::new());
        let planner = Planner::new(
            dir.path(),
            Arc::new(MemoryClusterReader::new()),
            comments.clone(),
            status.clone(),
            runs.clone(),
            Arc::new(BuiltinEvaluator::new()),
        );

        let cancel = CancellationToken::new();
        let enqueue_cancel = CancellationToken::new();
        jobs.enqueue(
            &enqueue_cancel,
            job("d-1", &["apps/payments/manifests/deploy.yaml"]),
        )
        .await
        .unwrap();
        // A malformed job is logged and skipped, not fatal.
        let mut malformed = job("d-2", &[]);
        malformed.event_type = "push".to_string();
        jobs.enqueue(&enqueue_cancel, malformed).await.unwrap();

        let deps = WorkerDeps {
            jobs: jobs.clone(),
            syncer: Arc::new(Syncer::new("", "master", dir.path(), None)),
            merge_requests: None,
            planner,
            runs: runs.clone(),
            repo_root: dir.path().to_path_buf(),
            default_base_ref: "master".to_string(),
        };
        let worker = tokio::spawn(run_worker(cancel.clone(), deps));
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        cancel.cancel();
        worker.await.unwrap();

        assert_eq!(comments.list(42).await.len(), 1);
        assert_eq!(runs.list(42, 1, 10).len(), 1);
        let statuses = status.list_statuses(42, "abc").await;
        assert!(!statuses.is_empty());
    }
}
