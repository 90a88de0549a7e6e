use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    Pending,
    Success,
    Failed,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Pending => "pending",
            CheckState::Success => "success",
            CheckState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCheck {
    pub merge_request_id: i64,
    pub sha: String,
    pub context: String,
    pub state: CheckState,
    pub description: String,
}

/// Commit status writes. Failures are tolerated: implementations log and
/// move on, a missing status never fails a plan run.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn set_status(&self, status: StatusCheck);
    async fn list_statuses(&self, merge_request_id: i64, sha: &str) -> Vec<StatusCheck>;
}

#[derive(Default)]
pub struct MemoryStatusPublisher {
    items: Mutex<Vec<StatusCheck>>,
}

impl MemoryStatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusPublisher for MemoryStatusPublisher {
    async fn set_status(&self, status: StatusCheck) {
        self.items.lock().unwrap().push(status);
    }

    async fn list_statuses(&self, merge_request_id: i64, sha: &str) -> Vec<StatusCheck> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .filter(|item| item.merge_request_id == merge_request_id && item.sha == sha)
            .cloned()
            .collect()
    }
}
