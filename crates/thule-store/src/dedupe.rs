use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupeError {
    #[error("redis dedupe: {message}")]
    Backend { message: String },
    #[error("invalid dedupe configuration: {message}")]
    InvalidConfig { message: String },
}

/// TTL-bounded suppression of duplicate logical events.
///
/// Independent of the delivery store: the delivery store dedupes on the
/// forge-assigned delivery id, this one dedupes on a content fingerprint so
/// that redeliveries under fresh delivery ids are still suppressed.
#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Returns true iff no live entry exists for `key`. A zero TTL accepts
    /// unconditionally.
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError>;
    async fn release(&self, key: &str) -> Result<(), DedupeError>;
}

#[derive(Default)]
pub struct MemoryDedupeStore {
    expiry: Mutex<HashMap<String, Instant>>,
}

impl MemoryDedupeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupeStore for MemoryDedupeStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError> {
        if ttl.is_zero() {
            return Ok(true);
        }
        let now = Instant::now();
        let mut expiry = self.expiry.lock().unwrap();
        expiry.retain(|_, deadline| *deadline > now);
        if expiry.contains_key(key) {
            return Ok(false);
        }
        expiry.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<(), DedupeError> {
        self.expiry.lock().unwrap().remove(key);
        Ok(())
    }
}

pub struct RedisDedupeStore {
    client: redis::Client,
    prefix: String,
}

impl RedisDedupeStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = if prefix.is_empty() {
            "thule:dedupe:".to_string()
        } else {
            prefix
        };
        Self { client, prefix }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, DedupeError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| DedupeError::Backend {
                message: err.to_string(),
            })
    }
}

#[async_trait]
impl DedupeStore for RedisDedupeStore {
    async fn reserve(&self, key: &str, ttl: Duration) -> Result<bool, DedupeError> {
        if ttl.is_zero() {
            return Ok(true);
        }
        let mut conn = self.connection().await?;
        let reserved: Option<String> = redis::cmd("SET")
            .arg(format!("{}{}", self.prefix, key))
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|err| DedupeError::Backend {
                message: err.to_string(),
            })?;
        Ok(reserved.is_some())
    }

    async fn release(&self, key: &str) -> Result<(), DedupeError> {
        let mut conn = self.connection().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(format!("{}{}", self.prefix, key))
            .query_async(&mut conn)
            .await
            .map_err(|err| DedupeError::Backend {
                message: err.to_string(),
            })?;
        Ok(())
    }
}

/// Resolved dedupe settings; `store` is `None` when dedupe is disabled.
pub struct DedupeConfig {
    pub store: Option<Arc<dyn DedupeStore>>,
    pub ttl: Duration,
    pub label: &'static str,
}

impl DedupeConfig {
    pub fn disabled() -> Self {
        Self {
            store: None,
            ttl: Duration::ZERO,
            label: "disabled",
        }
    }
}

/// Builds the dedupe store from `THULE_DEDUPE` / `THULE_DEDUPE_TTL`.
///
/// `auto` follows the queue backend: redis queues get redis dedupe so
/// suppression spans replicas, anything else stays in memory.
pub fn dedupe_from_env() -> Result<DedupeConfig, DedupeError> {
    let mut mode = env_or("THULE_DEDUPE", "auto").to_lowercase();
    if mode == "auto" {
        let queue_mode = env_or("THULE_QUEUE", "memory").to_lowercase();
        mode = if queue_mode == "redis" {
            "redis".to_string()
        } else {
            "memory".to_string()
        };
    }
    if matches!(mode.as_str(), "disabled" | "off" | "false") {
        return Ok(DedupeConfig::disabled());
    }

    let raw_ttl = env_or("THULE_DEDUPE_TTL", "5m");
    let ttl = parse_duration(&raw_ttl).ok_or_else(|| DedupeError::InvalidConfig {
        message: format!("invalid THULE_DEDUPE_TTL: {raw_ttl}"),
    })?;

    match mode.as_str() {
        "redis" => {
            let addr = env_or("THULE_REDIS_ADDR", "127.0.0.1:6379");
            let password = std::env::var("THULE_REDIS_PASSWORD").unwrap_or_default();
            let db = env_or("THULE_REDIS_DB", "0");
            let db: i64 = db.parse().map_err(|_| DedupeError::InvalidConfig {
                message: format!("invalid THULE_REDIS_DB: {db}"),
            })?;
            let prefix = env_or("THULE_REDIS_DEDUPE_PREFIX", "thule:dedupe:");
            let auth = if password.is_empty() {
                String::new()
            } else {
                format!(":{password}@")
            };
            let url = format!("redis://{auth}{addr}/{db}");
            let client = redis::Client::open(url).map_err(|err| DedupeError::InvalidConfig {
                message: err.to_string(),
            })?;
            Ok(DedupeConfig {
                store: Some(Arc::new(RedisDedupeStore::new(client, prefix))),
                ttl,
                label: "redis",
            })
        }
        "memory" => Ok(DedupeConfig {
            store: Some(Arc::new(MemoryDedupeStore::new())),
            ttl,
            label: "memory",
        }),
        other => Err(DedupeError::InvalidConfig {
            message: format!("invalid THULE_DEDUPE: {other}"),
        }),
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

/// Parses durations in the `30s` / `5m` / `1h` / `250ms` shape.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit())?);
    let value: u64 = value.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}
