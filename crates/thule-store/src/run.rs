use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Success,
    Failed,
    Canceled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Success => "success",
            RunState::Failed => "failed",
            RunState::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub merge_request_id: i64,
    pub head_sha: String,
    pub project: String,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifact {
    pub run_id: i64,
    pub name: String,
    pub body: String,
}

/// Append-only record of plan executions per merge request.
///
/// The latest-SHA map makes staleness visible to the planner: once a newer
/// head SHA has been observed for a merge request, in-flight runs for older
/// SHAs are expected to short-circuit at the next project boundary.
pub trait RunStore: Send + Sync {
    fn start(&self, merge_request_id: i64, head_sha: &str, project: &str) -> RunRecord;
    fn complete(&self, run_id: i64, state: RunState, error: Option<&str>);
    /// Most-recent-first, 1-based pages.
    fn list(&self, merge_request_id: i64, page: usize, page_size: usize) -> Vec<RunRecord>;
    fn add_artifact(&self, run_id: i64, name: &str, body: &str);
    fn list_artifacts(&self, run_id: i64, page: usize, page_size: usize) -> Vec<RunArtifact>;
    fn set_latest_sha(&self, merge_request_id: i64, sha: &str);
    /// True iff a SHA was recorded for the merge request and differs from `sha`.
    fn is_stale(&self, merge_request_id: i64, sha: &str) -> bool;
}

#[derive(Default)]
struct RunStoreInner {
    next_run_id: i64,
    runs: HashMap<i64, RunRecord>,
    by_mr: HashMap<i64, Vec<i64>>,
    artifacts: HashMap<i64, Vec<RunArtifact>>,
    latest_sha: HashMap<i64, String>,
}

pub struct MemoryRunStore {
    inner: Mutex<RunStoreInner>,
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RunStoreInner {
                next_run_id: 1,
                ..RunStoreInner::default()
            }),
        }
    }
}

impl RunStore for MemoryRunStore {
    fn start(&self, merge_request_id: i64, head_sha: &str, project: &str) -> RunRecord {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let record = RunRecord {
            id: inner.next_run_id,
            merge_request_id,
            head_sha: head_sha.to_string(),
            project: project.to_string(),
            state: RunState::Running,
            created_at: now,
            updated_at: now,
            error: None,
        };
        inner.next_run_id += 1;
        inner.runs.insert(record.id, record.clone());
        inner.by_mr.entry(merge_request_id).or_default().push(record.id);
        record
    }

    fn complete(&self, run_id: i64, state: RunState, error: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.runs.get_mut(&run_id) {
            record.state = state;
            record.error = error.map(str::to_string);
            record.updated_at = Utc::now();
        }
    }

    fn list(&self, merge_request_id: i64, page: usize, page_size: usize) -> Vec<RunRecord> {
        let inner = self.inner.lock().unwrap();
        let mut ids = inner
            .by_mr
            .get(&merge_request_id)
            .cloned()
            .unwrap_or_default();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        paginate(&ids, page, page_size)
            .iter()
            .filter_map(|id| inner.runs.get(id).cloned())
            .collect()
    }

    fn add_artifact(&self, run_id: i64, name: &str, body: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.artifacts.entry(run_id).or_default().push(RunArtifact {
            run_id,
            name: name.to_string(),
            body: body.to_string(),
        });
    }

    fn list_artifacts(&self, run_id: i64, page: usize, page_size: usize) -> Vec<RunArtifact> {
        let inner = self.inner.lock().unwrap();
        let items = inner.artifacts.get(&run_id).cloned().unwrap_or_default();
        paginate(&items, page, page_size)
    }

    fn set_latest_sha(&self, merge_request_id: i64, sha: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.latest_sha.insert(merge_request_id, sha.to_string());
    }

    fn is_stale(&self, merge_request_id: i64, sha: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.latest_sha.get(&merge_request_id) {
            Some(latest) => !latest.is_empty() && latest != sha,
            None => false,
        }
    }
}

fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    let page_size = if page_size == 0 { 20 } else { page_size };
    let page = page.max(1);
    let start = (page - 1) * page_size;
    if start >= items.len() {
        return Vec::new();
    }
    let end = (start + page_size).min(items.len());
    items[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_increase_and_list_is_most_recent_first() {
        let store = MemoryRunStore::new();
        let first = store.start(42, "sha-1", "alpha");
        let second = store.start(42, "sha-2", "beta");
        assert!(second.id > first.id);

        let listed = store.list(42, 1, 10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn complete_updates_state_and_error() {
        let store = MemoryRunStore::new();
        let record = store.start(7, "sha", "alpha");
        store.complete(record.id, RunState::Failed, Some("render exploded"));

        let listed = store.list(7, 1, 10);
        assert_eq!(listed[0].state, RunState::Failed);
        assert_eq!(listed[0].error.as_deref(), Some("render exploded"));
    }

    #[test]
    fn staleness_tracks_the_latest_sha() {
        let store = MemoryRunStore::new();
        assert!(!store.is_stale(99, "old"));
        store.set_latest_sha(99, "newer");
        assert!(store.is_stale(99, "old"));
        assert!(!store.is_stale(99, "newer"));
    }

    #[test]
    fn artifacts_are_paginated_in_insertion_order() {
        let store = MemoryRunStore::new();
        let record = store.start(1, "sha", "alpha");
        for i in 0..5 {
            store.add_artifact(record.id, &format!("artifact-{i}"), "body");
        }
        let first_page = store.list_artifacts(record.id, 1, 2);
        assert_eq!(first_page.len(), 2);
        assert_eq!(first_page[0].name, "artifact-0");
        let last_page = store.list_artifacts(record.id, 3, 2);
        assert_eq!(last_page.len(), 1);
        assert_eq!(last_page[0].name, "artifact-4");
        assert!(store.list_artifacts(record.id, 4, 2).is_empty());
    }
}
