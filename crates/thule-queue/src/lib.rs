use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// A queued plan request. Every enqueued job corresponds to a committed
/// delivery reservation in the delivery store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub delivery_id: String,
    pub event_type: String,
    pub repository: String,
    pub merge_request_id: i64,
    pub head_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<String>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue operation canceled")]
    Canceled,
    #[error("queue closed")]
    Closed,
    #[error("queue backend: {message}")]
    Backend { message: String },
    #[error("job codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("invalid queue configuration: {message}")]
    InvalidConfig { message: String },
}

/// FIFO job queue. Both operations block until they succeed or the
/// cancellation token fires.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, cancel: &CancellationToken, job: Job) -> Result<(), QueueError>;
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Job, QueueError>;
}

pub struct MemoryQueue {
    tx: mpsc::Sender<Job>,
    rx: Mutex<mpsc::Receiver<Job>>,
}

impl MemoryQueue {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, cancel: &CancellationToken, job: Job) -> Result<(), QueueError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(QueueError::Canceled),
            sent = self.tx.send(job) => sent.map_err(|_| QueueError::Closed),
        }
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Job, QueueError> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(QueueError::Canceled),
            received = rx.recv() => received.ok_or(QueueError::Closed),
        }
    }
}

/// Redis-backed queue: `RPUSH` on enqueue, blocking `BLPOP` on dequeue,
/// jobs serialized as JSON.
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    pub fn new(client: redis::Client, key: impl Into<String>) -> Self {
        let key = key.into();
        let key = if key.is_empty() {
            "thule:jobs".to_string()
        } else {
            key
        };
        Self { client, key }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| QueueError::Backend {
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, cancel: &CancellationToken, job: Job) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("RPUSH");
        cmd.arg(&self.key).arg(payload);
        let push = cmd.query_async(&mut conn);
        tokio::select! {
            _ = cancel.cancelled() => Err(QueueError::Canceled),
            pushed = push => match pushed {
                Ok(()) => Ok(()),
                Err(err) => Err(QueueError::Backend {
                    message: err.to_string(),
                }),
            },
        }
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Job, QueueError> {
        // Dedicated connection per dequeue: BLPOP parks the connection until
        // a job arrives.
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("BLPOP");
        cmd.arg(&self.key).arg(0);
        let pop = cmd.query_async(&mut conn);
        let popped: Option<(String, String)> = tokio::select! {
            _ = cancel.cancelled() => return Err(QueueError::Canceled),
            popped = pop => popped.map_err(|err| QueueError::Backend {
                message: err.to_string(),
            })?,
        };
        let (_, payload) = popped.ok_or_else(|| QueueError::Backend {
            message: "empty BLPOP result".to_string(),
        })?;
        Ok(serde_json::from_str(&payload)?)
    }
}

/// Builds the queue from `THULE_QUEUE` and its backend-specific settings.
pub fn queue_from_env() -> Result<std::sync::Arc<dyn JobQueue>, QueueError> {
    let mode = env_or("THULE_QUEUE", "memory").to_lowercase();
    match mode.as_str() {
        "redis" => {
            let addr = env_or("THULE_REDIS_ADDR", "127.0.0.1:6379");
            let password = std::env::var("THULE_REDIS_PASSWORD").unwrap_or_default();
            let db = env_or("THULE_REDIS_DB", "0");
            let db: i64 = db.parse().map_err(|_| QueueError::InvalidConfig {
                message: format!("invalid THULE_REDIS_DB: {db}"),
            })?;
            let key = env_or("THULE_REDIS_QUEUE", "thule:jobs");
            let auth = if password.is_empty() {
                String::new()
            } else {
                format!(":{password}@")
            };
            let url = format!("redis://{auth}{addr}/{db}");
            let client = redis::Client::open(url).map_err(|err| QueueError::InvalidConfig {
                message: err.to_string(),
            })?;
            Ok(std::sync::Arc::new(RedisQueue::new(client, key)))
        }
        "memory" => {
            let buffer = env_or("THULE_QUEUE_BUFFER", "100");
            let buffer: usize = buffer.parse().map_err(|_| QueueError::InvalidConfig {
                message: format!("invalid THULE_QUEUE_BUFFER: {buffer}"),
            })?;
            Ok(std::sync::Arc::new(MemoryQueue::new(buffer)))
        }
        other => Err(QueueError::InvalidConfig {
            message: format!("invalid THULE_QUEUE: {other}"),
        }),
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(delivery: &str) -> Job {
        Job {
            delivery_id: delivery.to_string(),
            event_type: "merge_request.updated".to_string(),
            repository: "org/repo".to_string(),
            merge_request_id: 42,
            head_sha: "abc".to_string(),
            base_ref: None,
            changed_files: vec!["apps/p/d.yaml".to_string()],
        }
    }

    #[tokio::test]
    async fn memory_queue_is_fifo() {
        let queue = MemoryQueue::new(10);
        let cancel = CancellationToken::new();
        queue.enqueue(&cancel, job("d-1")).await.unwrap();
        queue.enqueue(&cancel, job("d-2")).await.unwrap();

        assert_eq!(queue.dequeue(&cancel).await.unwrap().delivery_id, "d-1");
        assert_eq!(queue.dequeue(&cancel).await.unwrap().delivery_id, "d-2");
    }

    #[tokio::test]
    async fn cancellation_unblocks_dequeue() {
        let queue = MemoryQueue::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = queue.dequeue(&cancel).await.unwrap_err();
        assert!(matches!(err, QueueError::Canceled));
    }

    #[tokio::test]
    async fn cancellation_unblocks_enqueue_on_a_full_queue() {
        let queue = MemoryQueue::new(1);
        let cancel = CancellationToken::new();
        queue.enqueue(&cancel, job("d-1")).await.unwrap();

        let blocked = CancellationToken::new();
        blocked.cancel();
        let err = queue.enqueue(&blocked, job("d-2")).await.unwrap_err();
        assert!(matches!(err, QueueError::Canceled));
    }

    #[test]
    fn job_round_trips_through_json() {
        let original = Job {
            base_ref: Some("main".to_string()),
            ..job("d-1")
        };
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: Job = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
