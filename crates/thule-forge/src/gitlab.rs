use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::comments::{Comment, CommentStore};
use crate::status::{StatusCheck, StatusPublisher};
use crate::{ForgeError, MergeRequestReader};

const PLAN_MARKER: &str = "<!-- thule:plan -->";
const SUPERSEDED_MARKER: &str = "<!-- thule:superseded -->";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_STATUS_DESCRIPTION: usize = 255;

#[derive(Debug, Clone)]
pub struct GitLabOptions {
    pub base_url: String,
    pub token: String,
    pub project_path: String,
}

impl GitLabOptions {
    /// Reads `THULE_GITLAB_*` and derives the project path and API host
    /// from the repository URL where possible. Returns `None` when no token
    /// is configured, which means the memory backends stay in use.
    pub fn from_env(repo_url: &str) -> Result<Option<Self>, ForgeError> {
        let token = env_trimmed("THULE_GITLAB_TOKEN");
        if token.is_empty() {
            return Ok(None);
        }

        let mut project_path = env_trimmed("THULE_GITLAB_PROJECT_PATH");
        if project_path.is_empty() {
            project_path = parse_project_path(repo_url).unwrap_or_default();
        }
        if project_path.is_empty() {
            return Err(ForgeError::InvalidConfig {
                message: "THULE_GITLAB_PROJECT_PATH is required when the project path cannot be \
                          derived from the repository URL"
                    .to_string(),
            });
        }

        let mut base_url = env_trimmed("THULE_GITLAB_BASE_URL");
        if base_url.is_empty() {
            let host = parse_host(repo_url).ok_or_else(|| ForgeError::InvalidConfig {
                message: "THULE_GITLAB_BASE_URL is required when the host cannot be derived \
                          from the repository URL"
                    .to_string(),
            })?;
            base_url = format!("https://{host}/api/v4");
        }

        Ok(Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            project_path,
        }))
    }
}

struct GitLabClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    project_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GitLabNote {
    id: i64,
    body: String,
    #[serde(default)]
    system: bool,
}

impl GitLabClient {
    fn new(opts: GitLabOptions) -> Result<Self, ForgeError> {
        if opts.base_url.trim().is_empty() {
            return Err(ForgeError::InvalidConfig {
                message: "gitlab base url is required".to_string(),
            });
        }
        if opts.token.trim().is_empty() {
            return Err(ForgeError::InvalidConfig {
                message: "gitlab token is required".to_string(),
            });
        }
        if opts.project_path.trim().is_empty() {
            return Err(ForgeError::InvalidConfig {
                message: "gitlab project path is required".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: opts.base_url.trim_end_matches('/').to_string(),
            token: opts.token,
            project_path: opts.project_path.trim().to_string(),
        })
    }

    fn project_segment(&self) -> String {
        urlencode(&self.project_path)
    }

    fn notes_url(&self, merge_request_id: i64) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}/notes",
            self.base_url,
            self.project_segment(),
            merge_request_id
        )
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Option<T>, ForgeError> {
        let mut builder = self
            .http
            .request(method.clone(), url)
            .header("PRIVATE-TOKEN", &self.token)
            .header("Accept", "application/json");
        if let Some(payload) = payload {
            builder = builder.json(payload);
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ForgeError::Api {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate(&body, 300).to_string(),
            });
        }
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn list_notes(&self, merge_request_id: i64) -> Result<Vec<GitLabNote>, ForgeError> {
        let url = format!(
            "{}?per_page=100&order_by=created_at&sort=asc",
            self.notes_url(merge_request_id)
        );
        Ok(self
            .request(reqwest::Method::GET, &url, None)
            .await?
            .unwrap_or_default())
    }

    async fn create_note(
        &self,
        merge_request_id: i64,
        body: &str,
    ) -> Result<GitLabNote, ForgeError> {
        let payload = serde_json::json!({ "body": body });
        self.request(
            reqwest::Method::POST,
            &self.notes_url(merge_request_id),
            Some(&payload),
        )
        .await?
        .ok_or_else(|| ForgeError::Api {
            method: "POST".to_string(),
            url: self.notes_url(merge_request_id),
            status: 0,
            body: "empty create-note response".to_string(),
        })
    }

    async fn update_note(
        &self,
        merge_request_id: i64,
        note_id: i64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let payload = serde_json::json!({ "body": body });
        let url = format!("{}/{}", self.notes_url(merge_request_id), note_id);
        self.request::<serde_json::Value>(reqwest::Method::PUT, &url, Some(&payload))
            .await?;
        Ok(())
    }

    async fn set_commit_status(&self, status: &StatusCheck) -> Result<(), ForgeError> {
        let payload = serde_json::json!({
            "state": status.state.as_str(),
            "name": status.context,
            "description": truncate(&status.description, MAX_STATUS_DESCRIPTION),
        });
        let url = format!(
            "{}/projects/{}/statuses/{}",
            self.base_url,
            self.project_segment(),
            urlencode(&status.sha)
        );
        self.request::<serde_json::Value>(reqwest::Method::POST, &url, Some(&payload))
            .await?;
        Ok(())
    }
}

pub struct GitLabCommentStore {
    client: GitLabClient,
}

impl GitLabCommentStore {
    pub fn new(opts: GitLabOptions) -> Result<Self, ForgeError> {
        Ok(Self {
            client: GitLabClient::new(opts)?,
        })
    }
}

#[async_trait]
impl CommentStore for GitLabCommentStore {
    async fn post_or_supersede(&self, merge_request_id: i64, body: &str) -> Comment {
        if merge_request_id <= 0 {
            return Comment::default();
        }
        let existing = match self.client.list_notes(merge_request_id).await {
            Ok(notes) => notes,
            Err(err) => {
                warn!(mr = merge_request_id, error = %err, "gitlab comment list failed");
                Vec::new()
            }
        };

        let created = match self
            .client
            .create_note(merge_request_id, &prepend_marker(body))
            .await
        {
            Ok(note) => note,
            Err(err) => {
                warn!(mr = merge_request_id, error = %err, "gitlab comment create failed");
                return Comment::default();
            }
        };

        for note in existing {
            if note.id == created.id || note.system {
                continue;
            }
            if !is_plan_note(&note.body) || is_superseded_note(&note.body) {
                continue;
            }
            let superseded = build_superseded_body(created.id);
            if let Err(err) = self
                .client
                .update_note(merge_request_id, note.id, &superseded)
                .await
            {
                warn!(
                    mr = merge_request_id,
                    note = note.id,
                    error = %err,
                    "gitlab comment supersede failed"
                );
            }
        }

        Comment {
            id: created.id,
            merge_request_id,
            body: body.to_string(),
            superseded: false,
            superseded_by: 0,
        }
    }

    async fn list(&self, merge_request_id: i64) -> Vec<Comment> {
        let notes = match self.client.list_notes(merge_request_id).await {
            Ok(notes) => notes,
            Err(err) => {
                warn!(mr = merge_request_id, error = %err, "gitlab comment list failed");
                return Vec::new();
            }
        };
        notes
            .into_iter()
            .filter(|note| is_plan_note(&note.body))
            .map(|note| Comment {
                id: note.id,
                merge_request_id,
                superseded: is_superseded_note(&note.body),
                superseded_by: 0,
                body: strip_plan_marker(&note.body),
            })
            .collect()
    }
}

pub struct GitLabStatusPublisher {
    client: GitLabClient,
}

impl GitLabStatusPublisher {
    pub fn new(opts: GitLabOptions) -> Result<Self, ForgeError> {
        Ok(Self {
            client: GitLabClient::new(opts)?,
        })
    }
}

#[async_trait]
impl StatusPublisher for GitLabStatusPublisher {
    async fn set_status(&self, status: StatusCheck) {
        if status.sha.trim().is_empty() {
            return;
        }
        if let Err(err) = self.client.set_commit_status(&status).await {
            warn!(
                sha = %status.sha,
                context = %status.context,
                error = %err,
                "gitlab status publish failed"
            );
        }
    }

    async fn list_statuses(&self, _merge_request_id: i64, _sha: &str) -> Vec<StatusCheck> {
        Vec::new()
    }
}

pub struct GitLabMergeRequestReader {
    client: GitLabClient,
}

impl GitLabMergeRequestReader {
    pub fn new(opts: GitLabOptions) -> Result<Self, ForgeError> {
        Ok(Self {
            client: GitLabClient::new(opts)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GitLabChanges {
    #[serde(default)]
    changes: Vec<GitLabChange>,
}

#[derive(Debug, Deserialize)]
struct GitLabChange {
    #[serde(default)]
    new_path: String,
    #[serde(default)]
    old_path: String,
}

#[async_trait]
impl MergeRequestReader for GitLabMergeRequestReader {
    async fn changed_files(&self, merge_request_id: i64) -> Result<Vec<String>, ForgeError> {
        if merge_request_id <= 0 {
            return Err(ForgeError::MissingMergeRequest);
        }
        let url = format!(
            "{}/projects/{}/merge_requests/{}/changes",
            self.client.base_url,
            self.client.project_segment(),
            merge_request_id
        );
        let response: GitLabChanges = self
            .client
            .request(reqwest::Method::GET, &url, None)
            .await?
            .unwrap_or(GitLabChanges {
                changes: Vec::new(),
            });

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for change in response.changes {
            let path = if change.new_path.trim().is_empty() {
                change.old_path.trim().to_string()
            } else {
                change.new_path.trim().to_string()
            };
            if path.is_empty() || !seen.insert(path.clone()) {
                continue;
            }
            out.push(path);
        }
        Ok(out)
    }
}

fn env_trimmed(key: &str) -> String {
    std::env::var(key)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

fn prepend_marker(body: &str) -> String {
    format!("{PLAN_MARKER}\n\n{body}")
}

fn strip_plan_marker(body: &str) -> String {
    body.strip_prefix(PLAN_MARKER)
        .unwrap_or(body)
        .trim()
        .to_string()
}

fn is_plan_note(body: &str) -> bool {
    body.contains(PLAN_MARKER)
}

fn is_superseded_note(body: &str) -> bool {
    body.contains(SUPERSEDED_MARKER)
}

fn build_superseded_body(new_note_id: i64) -> String {
    format!(
        "{PLAN_MARKER}\n{SUPERSEDED_MARKER}\n<details><summary>Superseded Thule plan</summary>\n\n\
         Replaced by newer Thule run (note id: {new_note_id}).\n</details>"
    )
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn parse_host(repo_url: &str) -> Option<String> {
    if repo_url.is_empty() {
        return None;
    }
    if let Some(rest) = repo_url.strip_prefix("git@") {
        let colon = rest.find(':')?;
        return Some(rest[..colon].to_string());
    }
    let parsed = url::Url::parse(repo_url).ok()?;
    parsed.host_str().map(str::to_string)
}

fn parse_project_path(repo_url: &str) -> Option<String> {
    if repo_url.is_empty() {
        return None;
    }
    if repo_url.starts_with("git@") {
        let idx = repo_url.find(':')?;
        let path = &repo_url[idx + 1..];
        return Some(path.trim_end_matches(".git").to_string());
    }
    let parsed = url::Url::parse(repo_url).ok()?;
    let path = parsed.path().trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    Some(path.trim_end_matches(".git").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_notes_are_marked_and_stripped() {
        let marked = prepend_marker("## Thule Plan\n\nbody");
        assert!(is_plan_note(&marked));
        assert!(!is_superseded_note(&marked));
        assert_eq!(strip_plan_marker(&marked), "## Thule Plan\n\nbody");
    }

    #[test]
    fn superseded_body_carries_both_markers() {
        let body = build_superseded_body(99);
        assert!(is_plan_note(&body));
        assert!(is_superseded_note(&body));
        assert!(body.contains("note id: 99"));
    }

    #[test]
    fn project_path_from_ssh_and_https_urls() {
        assert_eq!(
            parse_project_path("git@gitlab.example.com:group/repo.git").as_deref(),
            Some("group/repo")
        );
        assert_eq!(
            parse_project_path("https://gitlab.example.com/group/sub/repo.git").as_deref(),
            Some("group/sub/repo")
        );
        assert_eq!(parse_project_path(""), None);
    }

    #[test]
    fn host_from_ssh_and_https_urls() {
        assert_eq!(
            parse_host("git@gitlab.example.com:group/repo.git").as_deref(),
            Some("gitlab.example.com")
        );
        assert_eq!(
            parse_host("https://gitlab.example.com/group/repo").as_deref(),
            Some("gitlab.example.com")
        );
    }

    #[test]
    fn project_segment_is_path_escaped() {
        assert_eq!(urlencode("group/sub/repo"), "group%2Fsub%2Frepo");
    }

    #[test]
    fn status_description_is_truncated() {
        let long = "x".repeat(400);
        assert_eq!(truncate(&long, 255).len(), 255);
        assert_eq!(truncate("short", 255), "short");
    }
}
