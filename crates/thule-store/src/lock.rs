use std::collections::HashMap;
use std::sync::Mutex;

/// Advisory per-(repository, project-root) lock owned by a merge request.
///
/// Keeps two open merge requests from planning the same project at once,
/// which would otherwise leave their "latest plan" comments fighting each
/// other. Acquire is reentrant for the owning merge request.
pub trait ProjectLock: Send + Sync {
    /// Returns `(true, merge_request_id)` when the key was free or already
    /// owned by the caller, `(false, owner)` otherwise.
    fn acquire(&self, repo: &str, project_key: &str, merge_request_id: i64) -> (bool, i64);
    /// Releases every key owned by the merge request within the repository.
    fn release_by_mr(&self, repo: &str, merge_request_id: i64);
    fn list(&self, repo: &str) -> HashMap<String, i64>;
}

#[derive(Default)]
pub struct MemoryProjectLock {
    locks: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl MemoryProjectLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectLock for MemoryProjectLock {
    fn acquire(&self, repo: &str, project_key: &str, merge_request_id: i64) -> (bool, i64) {
        let mut locks = self.locks.lock().unwrap();
        let repo_locks = locks.entry(repo.to_string()).or_default();
        match repo_locks.get(project_key) {
            Some(&owner) if owner != merge_request_id => (false, owner),
            _ => {
                repo_locks.insert(project_key.to_string(), merge_request_id);
                (true, merge_request_id)
            }
        }
    }

    fn release_by_mr(&self, repo: &str, merge_request_id: i64) {
        let mut locks = self.locks.lock().unwrap();
        if let Some(repo_locks) = locks.get_mut(repo) {
            repo_locks.retain(|_, owner| *owner != merge_request_id);
        }
    }

    fn list(&self, repo: &str) -> HashMap<String, i64> {
        let locks = self.locks.lock().unwrap();
        locks.get(repo).cloned().unwrap_or_default()
    }
}
