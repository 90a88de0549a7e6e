use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use crate::auth::{authenticated_url, RepoAuth};
use crate::RepoError;

const FETCH_REFSPECS: &[&str] = &[
    "+refs/heads/*:refs/remotes/origin/*",
    "+refs/merge-requests/*:refs/merge-requests/*",
];

/// Keeps the worker's clone of the GitOps repository current: clone when
/// absent, fetch heads and merge-request refs, then force-checkout the
/// job's SHA (or the configured base ref when the job has none).
pub struct Syncer {
    url: String,
    reference: String,
    dir: PathBuf,
    auth: Option<RepoAuth>,
}

impl Syncer {
    pub fn new(
        url: impl Into<String>,
        reference: impl Into<String>,
        dir: impl Into<PathBuf>,
        auth: Option<RepoAuth>,
    ) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            dir: dir.into(),
            auth,
        }
    }

    /// Sync is a no-op when no repository URL is configured; the worker
    /// then plans against whatever is already on disk.
    pub fn enabled(&self) -> bool {
        !self.url.is_empty()
    }

    pub async fn sync(&self, sha: &str) -> Result<(), RepoError> {
        if !self.enabled() {
            return Ok(());
        }
        if self.dir.as_os_str().is_empty() {
            return Err(RepoError::MissingDir);
        }

        if !self.dir.join(".git").exists() {
            self.clone_repo().await?;
        }
        self.fetch().await?;

        if !sha.is_empty() {
            return self.checkout(sha).await;
        }
        if !self.reference.is_empty() {
            return self.checkout(&self.reference).await;
        }
        Ok(())
    }

    /// Periodic housekeeping for long-lived clones: refresh remote refs and
    /// let git compact objects. Best effort, never fails a job.
    pub async fn maintain(&self) -> Result<(), RepoError> {
        if !self.enabled() || !self.dir.join(".git").exists() {
            return Ok(());
        }
        self.fetch().await?;
        if let Err(err) = self.run("gc", |cmd| {
            cmd.arg("-C").arg(&self.dir).args(["gc", "--auto", "--quiet"]);
        })
        .await
        {
            debug!(error = %err, "repo gc skipped");
        }
        Ok(())
    }

    async fn clone_repo(&self) -> Result<(), RepoError> {
        if let Some(parent) = self.dir.parent() {
            std::fs::create_dir_all(parent).map_err(|err| RepoError::Git {
                context: "create repo parent",
                message: err.to_string(),
            })?;
        }
        let url = authenticated_url(&self.url, self.auth.as_ref());
        self.run("clone", |cmd| {
            cmd.arg("clone").arg("--quiet");
            if !self.reference.is_empty() {
                cmd.args(["--branch", &self.reference, "--single-branch"]);
            }
            cmd.arg(&url).arg(&self.dir);
        })
        .await
    }

    async fn fetch(&self) -> Result<(), RepoError> {
        let url = authenticated_url(&self.url, self.auth.as_ref());
        self.run("fetch", |cmd| {
            cmd.arg("-C")
                .arg(&self.dir)
                .args(["fetch", "--quiet", &url])
                .args(FETCH_REFSPECS);
        })
        .await
    }

    async fn checkout(&self, target: &str) -> Result<(), RepoError> {
        self.run("checkout", |cmd| {
            cmd.arg("-C")
                .arg(&self.dir)
                .args(["checkout", "--force", "--quiet", target]);
        })
        .await
    }

    async fn run(
        &self,
        context: &'static str,
        configure: impl FnOnce(&mut Command),
    ) -> Result<(), RepoError> {
        let mut cmd = Command::new("git");
        configure(&mut cmd);
        let output = cmd.output().await.map_err(|err| RepoError::Git {
            context,
            message: err.to_string(),
        })?;
        if !output.status.success() {
            return Err(RepoError::Git {
                context,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Builds the syncer from `THULE_REPO_URL` / `THULE_REPO_REF` /
/// `THULE_REPO_ROOT` plus git credentials.
pub fn syncer_from_env() -> Syncer {
    let url = std::env::var("THULE_REPO_URL").unwrap_or_default();
    let reference = std::env::var("THULE_REPO_REF").unwrap_or_else(|_| "master".to_string());
    let dir = std::env::var("THULE_REPO_ROOT").unwrap_or_else(|_| ".".to_string());
    Syncer::new(url, reference, dir, crate::auth::auth_from_env())
}
