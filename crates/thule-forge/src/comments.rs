use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub merge_request_id: i64,
    pub body: String,
    pub superseded: bool,
    pub superseded_by: i64,
}

/// Plan comment writes with supersession.
///
/// Posting a new plan marks every previously-active plan comment on the
/// merge request as superseded instead of deleting it, so the discussion
/// history stays intact. Outbound failures are logged by implementations
/// and surface as a zero-valued comment, never as an error: a missing
/// comment is visible on the merge request itself.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn post_or_supersede(&self, merge_request_id: i64, body: &str) -> Comment;
    async fn list(&self, merge_request_id: i64) -> Vec<Comment>;
}

#[derive(Default)]
pub struct MemoryCommentStore {
    inner: Mutex<MemoryCommentsInner>,
}

struct MemoryCommentsInner {
    next_id: i64,
    comments: HashMap<i64, Vec<Comment>>,
}

impl Default for MemoryCommentsInner {
    fn default() -> Self {
        Self {
            next_id: 1,
            comments: HashMap::new(),
        }
    }
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn post_or_supersede(&self, merge_request_id: i64, body: &str) -> Comment {
        let mut inner = self.inner.lock().unwrap();
        let comment = Comment {
            id: inner.next_id,
            merge_request_id,
            body: body.to_string(),
            superseded: false,
            superseded_by: 0,
        };
        inner.next_id += 1;
        let entries = inner.comments.entry(merge_request_id).or_default();
        for entry in entries.iter_mut() {
            if !entry.superseded {
                entry.superseded = true;
                entry.superseded_by = comment.id;
            }
        }
        entries.push(comment.clone());
        comment
    }

    async fn list(&self, merge_request_id: i64) -> Vec<Comment> {
        let inner = self.inner.lock().unwrap();
        inner
            .comments
            .get(&merge_request_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posting_supersedes_every_active_comment() {
        let store = MemoryCommentStore::new();
        let first = store.post_or_supersede(7, "plan v1").await;
        let second = store.post_or_supersede(7, "plan v2").await;

        let comments = store.list(7).await;
        assert_eq!(comments.len(), 2);
        assert!(comments[0].superseded);
        assert_eq!(comments[0].superseded_by, second.id);
        assert!(!comments[1].superseded);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn merge_requests_are_independent() {
        let store = MemoryCommentStore::new();
        store.post_or_supersede(1, "plan for 1").await;
        store.post_or_supersede(2, "plan for 2").await;

        assert_eq!(store.list(1).await.len(), 1);
        assert!(!store.list(1).await[0].superseded);
        assert_eq!(store.list(3).await.len(), 0);
    }
}
