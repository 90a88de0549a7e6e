pub mod approval;
pub mod comments;
pub mod gitlab;
pub mod status;

pub use crate::approval::{ApprovalDecision, ApprovalRecord, Approver, MemoryApprover};
pub use crate::comments::{Comment, CommentStore, MemoryCommentStore};
pub use crate::gitlab::{
    GitLabCommentStore, GitLabMergeRequestReader, GitLabOptions, GitLabStatusPublisher,
};
pub use crate::status::{CheckState, MemoryStatusPublisher, StatusCheck, StatusPublisher};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("forge api {method} {url}: status={status} body={body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },
    #[error("forge request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode forge response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid forge configuration: {message}")]
    InvalidConfig { message: String },
    #[error("merge request id is required")]
    MissingMergeRequest,
}

/// Reads the changed-file list of a merge request; the fallback used when a
/// webhook omits `changed_files`.
#[async_trait]
pub trait MergeRequestReader: Send + Sync {
    async fn changed_files(&self, merge_request_id: i64) -> Result<Vec<String>, ForgeError>;
}
