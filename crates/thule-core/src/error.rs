use thiserror::Error;

use thule_queue::QueueError;

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("invalid event: {message}")]
    InvalidEvent { message: String },
    #[error("project {project} is locked by merge request !{owner}")]
    LockedByOther { project: String, owner: i64 },
    #[error("enqueue failed: {0}")]
    Enqueue(#[from] QueueError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config payload: {message}")]
    Decode { message: String },
    #[error("invalid config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render path {path}: {source}")]
    Path {
        path: String,
        source: std::io::Error,
    },
    #[error("parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("render mode {mode} not implemented")]
    UnsupportedMode { mode: String },
}

#[derive(Debug, Error)]
#[error("cluster read failed: {message}")]
pub struct ClusterError {
    pub message: String,
}

impl ClusterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}
