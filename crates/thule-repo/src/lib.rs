pub mod auth;
pub mod diff;
pub mod sync;

pub use crate::auth::{auth_from_env, RepoAuth};
pub use crate::diff::changed_files;
pub use crate::sync::{syncer_from_env, Syncer};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repo dir is empty")]
    MissingDir,
    #[error("head sha is empty")]
    MissingHead,
    #[error("base ref {reference:?} not found")]
    BaseRefNotFound { reference: String },
    #[error("open repo {dir}: {message}")]
    Open { dir: String, message: String },
    #[error("git {context}: {message}")]
    Git {
        context: &'static str,
        message: String,
    },
}

pub(crate) fn git_error<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> RepoError {
    move |err| RepoError::Git {
        context,
        message: err.to_string(),
    }
}
