use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thule_forge::{CheckState, CommentStore, StatusCheck, StatusPublisher};
use thule_store::{RunState, RunStore};

use crate::cluster::ClusterReader;
use crate::config;
use crate::discovery::{clean_path, discover_from_changed_files};
use crate::diff::{self, DiffOptions};
use crate::error::PlanError;
use crate::event::MergeRequestEvent;
use crate::policy::PolicyEvaluator;
use crate::render::{self, Resource};
use crate::report::{self, ProjectPlan};

pub const STATUS_CONTEXT: &str = "thule/plan";

/// Renders, diffs, and evaluates policy for every project a merge-request
/// event touches, then posts one aggregated comment and a commit status.
///
/// Exactly one error path exists: mark this event's earlier runs failed,
/// publish a failed status, return the error. Staleness is not an error:
/// once a newer head SHA is on record for the merge request, the event is
/// abandoned silently and the newer event re-plans.
pub struct Planner {
    repo_root: PathBuf,
    cluster: Arc<dyn ClusterReader>,
    comments: Arc<dyn CommentStore>,
    status: Arc<dyn StatusPublisher>,
    runs: Arc<dyn RunStore>,
    policy: Arc<dyn PolicyEvaluator>,
}

impl Planner {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        cluster: Arc<dyn ClusterReader>,
        comments: Arc<dyn CommentStore>,
        status: Arc<dyn StatusPublisher>,
        runs: Arc<dyn RunStore>,
        policy: Arc<dyn PolicyEvaluator>,
    ) -> Self {
        Self {
            repo_root: repo_root.into(),
            cluster,
            comments,
            status,
            runs,
            policy,
        }
    }

    pub async fn plan_for_event(&self, event: &MergeRequestEvent) -> Result<(), PlanError> {
        if self
            .runs
            .is_stale(event.merge_request_id, &event.head_sha)
        {
            return Ok(());
        }
        self.runs
            .set_latest_sha(event.merge_request_id, &event.head_sha);
        self.set_status(event, CheckState::Pending, "Thule plan running")
            .await;

        let projects = discover_from_changed_files(&event.changed_files);
        let mut planned = false;
        let mut project_plans: Vec<ProjectPlan> = Vec::new();
        let mut run_ids: Vec<i64> = Vec::new();
        let mut max_resource_details = 0usize;

        for project in projects {
            if self
                .runs
                .is_stale(event.merge_request_id, &event.head_sha)
            {
                return Ok(());
            }
            let config_path = self.repo_root.join(&project.config_path);
            if !config_path.is_file() {
                continue;
            }
            planned = true;

            let cfg = match config::load(&config_path) {
                Ok(cfg) => cfg,
                Err(err) => {
                    return Err(self.fail(event, &run_ids, 0, err.into()).await);
                }
            };
            max_resource_details = max_resource_details.max(cfg.comment.max_resource_details);

            let desired = match render::render_project(&self.repo_root.join(&project.root), &cfg) {
                Ok(desired) => desired,
                Err(err) => {
                    return Err(self.fail(event, &run_ids, 0, err.into()).await);
                }
            };
            let desired =
                filter_desired_by_changed_files(desired, &event.changed_files, &self.repo_root);
            if desired.is_empty() {
                continue;
            }

            let record = self
                .runs
                .start(event.merge_request_id, &event.head_sha, &cfg.project);
            run_ids.push(record.id);

            let listed = match self
                .cluster
                .list_resources_for_project(&cfg.project, &cfg.cluster_ref, &cfg.namespace, &desired)
                .await
            {
                Some(listed) => listed,
                None => {
                    self.cluster
                        .list_resources(&cfg.cluster_ref, &cfg.namespace)
                        .await
                }
            };
            let actual = match listed {
                Ok(actual) => actual,
                Err(err) => {
                    return Err(self.fail(event, &run_ids, record.id, err.into()).await);
                }
            };

            let (changes, summary) = diff::compute(
                &desired,
                &actual,
                &DiffOptions {
                    prune_deletes: cfg.diff.prune,
                    ignore_fields: cfg.diff.ignore_fields.clone(),
                    ignore_actual_extra_fields: true,
                },
            );
            let findings = self.policy.evaluate(&desired, &cfg.policy.profile);
            project_plans.push(ProjectPlan {
                project: cfg.project.clone(),
                changes,
                summary,
                findings,
            });
        }

        if !planned {
            let body = report::build_no_changes_comment(&event.head_sha, &event.changed_files, 50);
            self.comments
                .post_or_supersede(event.merge_request_id, &body)
                .await;
        }

        if planned {
            let body = if project_plans.is_empty() {
                report::build_no_changes_comment(&event.head_sha, &event.changed_files, 50)
            } else {
                report::build_aggregated_plan_comment(
                    &event.head_sha,
                    &project_plans,
                    max_resource_details,
                )
            };
            let comment = self
                .comments
                .post_or_supersede(event.merge_request_id, &body)
                .await;
            for run_id in &run_ids {
                self.runs.add_artifact(*run_id, "plan-comment", &body);
                if comment.id > 0 {
                    self.runs
                        .add_artifact(*run_id, "comment-id", &comment.id.to_string());
                }
                self.runs.complete(*run_id, RunState::Success, None);
            }
        }

        self.set_status(event, CheckState::Success, "Thule plan completed")
            .await;
        Ok(())
    }

    /// The single error path: every earlier run of this event fails, the
    /// current run (when any) fails, and the commit status flips to failed.
    async fn fail(
        &self,
        event: &MergeRequestEvent,
        run_ids: &[i64],
        current_run_id: i64,
        err: PlanError,
    ) -> PlanError {
        let message = err.to_string();
        for run_id in run_ids {
            if *run_id == current_run_id {
                continue;
            }
            self.runs
                .complete(*run_id, RunState::Failed, Some(&message));
        }
        if current_run_id > 0 {
            self.runs
                .complete(current_run_id, RunState::Failed, Some(&message));
        }
        self.set_status(event, CheckState::Failed, &message).await;
        err
    }

    async fn set_status(&self, event: &MergeRequestEvent, state: CheckState, description: &str) {
        self.status
            .set_status(StatusCheck {
                merge_request_id: event.merge_request_id,
                sha: event.head_sha.clone(),
                context: STATUS_CONTEXT.to_string(),
                state,
                description: description.to_string(),
            })
            .await;
    }
}

/// Keeps only resources whose source manifest is among the event's changed
/// YAML files. An event without changed files keeps everything; an event
/// whose changed files contain no YAML drops the whole project.
fn filter_desired_by_changed_files(
    desired: Vec<Resource>,
    changed_files: &[String],
    repo_root: &Path,
) -> Vec<Resource> {
    if desired.is_empty() || changed_files.is_empty() {
        return desired;
    }
    let changed_manifests: HashSet<String> = changed_files
        .iter()
        .map(|file| clean_path(file))
        .filter(|file| {
            let lower = file.to_lowercase();
            lower.ends_with(".yaml") || lower.ends_with(".yml")
        })
        .collect();
    if changed_manifests.is_empty() {
        return Vec::new();
    }

    desired
        .into_iter()
        .filter(|resource| {
            let Some(source) = &resource.source_path else {
                return false;
            };
            let relative = source.strip_prefix(repo_root).unwrap_or(source);
            changed_manifests.contains(&clean_path(&relative.to_string_lossy()))
        })
        .collect()
}
