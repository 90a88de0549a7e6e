use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ClusterError;
use crate::render::Resource;

/// Read-only view of live cluster state, resolved through an opaque cluster
/// ref. Implementations must never mutate anything.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    async fn list_resources(
        &self,
        cluster_ref: &str,
        namespace: &str,
    ) -> Result<Vec<Resource>, ClusterError>;

    /// Project-aware variant: readers that can fetch exactly the desired
    /// resources return `Some`, everyone else inherits `None` and the
    /// planner falls back to the namespace-wide list.
    async fn list_resources_for_project(
        &self,
        _project: &str,
        _cluster_ref: &str,
        _namespace: &str,
        _desired: &[Resource],
    ) -> Option<Result<Vec<Resource>, ClusterError>> {
        None
    }
}

#[derive(Default)]
pub struct MemoryClusterReader {
    by_cluster_ns: Mutex<HashMap<String, Vec<Resource>>>,
}

impl MemoryClusterReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cluster_ref: &str, namespace: &str, resources: Vec<Resource>) {
        let mut map = self.by_cluster_ns.lock().unwrap();
        map.insert(format!("{cluster_ref}/{namespace}"), resources);
    }
}

#[async_trait]
impl ClusterReader for MemoryClusterReader {
    async fn list_resources(
        &self,
        cluster_ref: &str,
        namespace: &str,
    ) -> Result<Vec<Resource>, ClusterError> {
        let map = self.by_cluster_ns.lock().unwrap();
        Ok(map
            .get(&format!("{cluster_ref}/{namespace}"))
            .cloned()
            .unwrap_or_default())
    }
}

/// Test-only reader that fails every read.
pub struct FailingClusterReader {
    pub message: String,
}

#[async_trait]
impl ClusterReader for FailingClusterReader {
    async fn list_resources(
        &self,
        _cluster_ref: &str,
        _namespace: &str,
    ) -> Result<Vec<Resource>, ClusterError> {
        Err(ClusterError::new(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_reader_is_keyed_by_cluster_and_namespace() {
        let reader = MemoryClusterReader::new();
        reader.insert(
            "prod-east",
            "payments",
            vec![Resource {
                api_version: "v1".to_string(),
                kind: "Service".to_string(),
                namespace: "payments".to_string(),
                name: "web".to_string(),
                body: serde_json::json!({}),
                source_path: None,
            }],
        );

        let found = reader.list_resources("prod-east", "payments").await.unwrap();
        assert_eq!(found.len(), 1);
        let missing = reader.list_resources("prod-east", "billing").await.unwrap();
        assert!(missing.is_empty());
        assert!(reader
            .list_resources_for_project("p", "prod-east", "payments", &[])
            .await
            .is_none());
    }
}
