use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use thule_queue::{Job, JobQueue};
use thule_store::{DedupeConfig, DeliveryStore, ProjectLock, RunStore};

use crate::discovery::discover_from_changed_files;
use crate::error::IngressError;
use crate::event::MergeRequestEvent;

/// Webhook admission: validates the normalized event, claims its delivery
/// id, and either releases locks (close/merge) or locks the touched
/// projects and enqueues a plan job.
///
/// The ordering reserve -> dedupe -> lock -> enqueue -> commit leaves one
/// rollback point per failure class: releasing the delivery reservation.
pub struct IngressService {
    jobs: Arc<dyn JobQueue>,
    deliveries: Arc<dyn DeliveryStore>,
    locks: Arc<dyn ProjectLock>,
    runs: Arc<dyn RunStore>,
    dedupe: DedupeConfig,
}

impl IngressService {
    pub fn new(
        jobs: Arc<dyn JobQueue>,
        deliveries: Arc<dyn DeliveryStore>,
        locks: Arc<dyn ProjectLock>,
        runs: Arc<dyn RunStore>,
        dedupe: DedupeConfig,
    ) -> Self {
        Self {
            jobs,
            deliveries,
            locks,
            runs,
            dedupe,
        }
    }

    pub async fn handle_merge_request_event(
        &self,
        cancel: &CancellationToken,
        event: &MergeRequestEvent,
    ) -> Result<(), IngressError> {
        validate(event)?;

        if !self.deliveries.reserve(&event.delivery_id) {
            // Duplicate delivery; admission already happened.
            return Ok(());
        }

        if event.event_type.is_close() {
            self.locks
                .release_by_mr(&event.repository, event.merge_request_id);
            self.deliveries.commit(&event.delivery_id);
            return Ok(());
        }

        if let Some(dedupe) = &self.dedupe.store {
            match dedupe.reserve(&event.fingerprint(), self.dedupe.ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    self.deliveries.commit(&event.delivery_id);
                    return Ok(());
                }
                Err(err) => {
                    // Fail open: the delivery store still dedupes exact
                    // redeliveries.
                    warn!(delivery = %event.delivery_id, error = %err, "dedupe reserve failed");
                }
            }
        }

        for project in discover_from_changed_files(&event.changed_files) {
            let (acquired, owner) = self.locks.acquire(
                &event.repository,
                &project.root,
                event.merge_request_id,
            );
            if !acquired {
                self.deliveries.release(&event.delivery_id);
                return Err(IngressError::LockedByOther {
                    project: project.root,
                    owner,
                });
            }
        }

        let job = Job {
            delivery_id: event.delivery_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            repository: event.repository.clone(),
            merge_request_id: event.merge_request_id,
            head_sha: event.head_sha.clone(),
            base_ref: event.base_ref.clone(),
            changed_files: event.changed_files.clone(),
        };
        if let Err(err) = self.jobs.enqueue(cancel, job).await {
            self.deliveries.release(&event.delivery_id);
            return Err(IngressError::Enqueue(err));
        }

        // Record the newest observed head SHA at admission so planners
        // already working an older SHA of this merge request go stale.
        self.runs
            .set_latest_sha(event.merge_request_id, &event.head_sha);
        self.deliveries.commit(&event.delivery_id);
        Ok(())
    }
}

fn validate(event: &MergeRequestEvent) -> Result<(), IngressError> {
    if event.delivery_id.is_empty() {
        return Err(IngressError::InvalidEvent {
            message: "delivery_id is required".to_string(),
        });
    }
    if event.repository.is_empty() || event.head_sha.is_empty() || event.merge_request_id <= 0 {
        return Err(IngressError::InvalidEvent {
            message: "missing required event fields".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use thule_queue::MemoryQueue;
    use thule_store::{MemoryDedupeStore, MemoryDeliveryStore, MemoryProjectLock, MemoryRunStore};

    use crate::event::EventType;

    struct Harness {
        service: IngressService,
        queue: Arc<MemoryQueue>,
        deliveries: Arc<MemoryDeliveryStore>,
        locks: Arc<MemoryProjectLock>,
        runs: Arc<MemoryRunStore>,
        cancel: CancellationToken,
    }

    fn harness(dedupe: DedupeConfig) -> Harness {
        let queue = Arc::new(MemoryQueue::new(16));
        let deliveries = Arc::new(MemoryDeliveryStore::new());
        let locks = Arc::new(MemoryProjectLock::new());
        let runs = Arc::new(MemoryRunStore::new());
        let service = IngressService::new(
            queue.clone(),
            deliveries.clone(),
            locks.clone(),
            runs.clone(),
            dedupe,
        );
        Harness {
            service,
            queue,
            deliveries,
            locks,
            runs,
            cancel: CancellationToken::new(),
        }
    }

    fn event(delivery: &str, mr: i64, changed: &[&str]) -> MergeRequestEvent {
        MergeRequestEvent {
            delivery_id: delivery.to_string(),
            event_type: EventType::MergeRequestUpdated,
            repository: "org/repo".to_string(),
            merge_request_id: mr,
            head_sha: "abc".to_string(),
            base_ref: None,
            changed_files: changed.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn drain(harness: &Harness) -> Vec<Job> {
        let mut jobs = Vec::new();
        loop {
            let cancel = CancellationToken::new();
            tokio::select! {
                job = harness.queue.dequeue(&cancel) => jobs.push(job.unwrap()),
                _ = tokio::time::sleep(Duration::from_millis(10)) => break,
            }
        }
        jobs
    }

    #[tokio::test]
    async fn duplicate_delivery_is_suppressed_without_queue_growth() {
        let h = harness(DedupeConfig::disabled());
        let evt = event("d-1", 42, &["apps/p/d.yaml"]);
        h.service
            .handle_merge_request_event(&h.cancel, &evt)
            .await
            .unwrap();
        h.service
            .handle_merge_request_event(&h.cancel, &evt)
            .await
            .unwrap();

        let jobs = drain(&h).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].merge_request_id, 42);
        assert_eq!(jobs[0].head_sha, "abc");
        assert!(h.deliveries.seen("d-1"));
    }

    #[tokio::test]
    async fn lock_conflict_names_the_owner_and_releases_the_delivery() {
        let h = harness(DedupeConfig::disabled());
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-1", 1, &["apps/payments/deploy.yaml"]))
            .await
            .unwrap();

        let err = h
            .service
            .handle_merge_request_event(&h.cancel, &event("d-2", 2, &["apps/payments/deploy.yaml"]))
            .await
            .unwrap_err();
        match err {
            IngressError::LockedByOther { owner, .. } => assert_eq!(owner, 1),
            other => panic!("unexpected error: {other}"),
        }
        // The losing delivery id is reservable again.
        assert!(!h.deliveries.seen("d-2"));
        assert!(h.deliveries.reserve("d-2"));
    }

    #[tokio::test]
    async fn close_releases_every_lock_owned_by_the_mr() {
        let h = harness(DedupeConfig::disabled());
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-1", 10, &["apps/payments/deploy.yaml"]))
            .await
            .unwrap();

        let mut close = event("d-2", 10, &[]);
        close.event_type = EventType::MergeRequestClosed;
        h.service
            .handle_merge_request_event(&h.cancel, &close)
            .await
            .unwrap();

        h.service
            .handle_merge_request_event(&h.cancel, &event("d-3", 20, &["apps/payments/deploy.yaml"]))
            .await
            .unwrap();

        let held = h.locks.list("org/repo");
        assert_eq!(held.get("apps/payments"), Some(&20));
        // Close events admit without enqueuing.
        assert_eq!(drain(&h).await.len(), 2);
    }

    #[tokio::test]
    async fn same_fingerprint_is_suppressed_within_the_ttl() {
        let dedupe = DedupeConfig {
            store: Some(Arc::new(MemoryDedupeStore::new())),
            ttl: Duration::from_secs(300),
            label: "memory",
        };
        let h = harness(dedupe);
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-1", 42, &["apps/p/d.yaml"]))
            .await
            .unwrap();
        // Same logical event, fresh delivery id.
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-2", 42, &["apps/p/d.yaml"]))
            .await
            .unwrap();

        assert_eq!(drain(&h).await.len(), 1);
        // Both deliveries are committed so redeliveries stay suppressed.
        assert!(h.deliveries.seen("d-1"));
        assert!(h.deliveries.seen("d-2"));
    }

    #[tokio::test]
    async fn invalid_events_are_rejected_before_any_state_change() {
        let h = harness(DedupeConfig::disabled());
        let mut missing_delivery = event("", 42, &[]);
        missing_delivery.delivery_id = String::new();
        let err = h
            .service
            .handle_merge_request_event(&h.cancel, &missing_delivery)
            .await
            .unwrap_err();
        assert!(matches!(err, IngressError::InvalidEvent { .. }));

        let bad_mr = event("d-1", 0, &[]);
        let err = h
            .service
            .handle_merge_request_event(&h.cancel, &bad_mr)
            .await
            .unwrap_err();
        assert!(matches!(err, IngressError::InvalidEvent { .. }));
        assert!(!h.deliveries.seen("d-1"));
    }

    #[tokio::test]
    async fn admission_records_the_latest_head_sha() {
        let h = harness(DedupeConfig::disabled());
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-1", 42, &["apps/p/d.yaml"]))
            .await
            .unwrap();

        let mut newer = event("d-2", 42, &["apps/p/d.yaml"]);
        newer.head_sha = "def".to_string();
        h.service
            .handle_merge_request_event(&h.cancel, &newer)
            .await
            .unwrap();

        // The first event's SHA is now stale, the newer one is not.
        assert!(h.runs.is_stale(42, "abc"));
        assert!(!h.runs.is_stale(42, "def"));
    }

    #[tokio::test]
    async fn reentrant_lock_for_the_same_mr_is_allowed() {
        let h = harness(DedupeConfig::disabled());
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-1", 7, &["apps/p/d.yaml"]))
            .await
            .unwrap();
        h.service
            .handle_merge_request_event(&h.cancel, &event("d-2", 7, &["apps/p/d.yaml"]))
            .await
            .unwrap();
        assert_eq!(drain(&h).await.len(), 2);
    }
}
