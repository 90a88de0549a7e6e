use serde_json::Value;
use thiserror::Error;

use thule_core::{EventType, MergeRequestEvent};

#[derive(Debug, Error)]
#[error("invalid payload: {message}")]
pub struct PayloadError {
    pub message: String,
}

impl PayloadError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Normalizes the accepted webhook shapes into a `MergeRequestEvent`:
/// the native shape, the forge `merge_request` hook, and the forge `note`
/// hook carrying a `/thule plan` command. Anything else is rejected.
pub fn decode_event(body: &[u8]) -> Result<MergeRequestEvent, PayloadError> {
    if let Ok(event) = serde_json::from_slice::<MergeRequestEvent>(body) {
        if !event.delivery_id.is_empty() && event.merge_request_id > 0 {
            return Ok(event);
        }
    }

    let payload: Value = serde_json::from_slice(body)
        .map_err(|err| PayloadError::new(format!("not json: {err}")))?;

    let delivery_id = first_str(&payload, &["event_id", "delivery_id"]);
    let repository = str_at(&payload, &["project", "path_with_namespace"]);
    let changed_files = str_array(payload.get("changed_files"));

    match str_at(&payload, &["object_kind"]).as_str() {
        "merge_request" => {
            let attrs = payload.get("object_attributes").cloned().unwrap_or(Value::Null);
            let merge_request_id = int_at(&attrs, &["iid"]);
            let mut head_sha = str_at(&attrs, &["last_commit", "id"]);
            if head_sha.is_empty() {
                head_sha = str_at(&payload, &["head_sha"]);
            }
            let action = str_at(&attrs, &["action"]).to_lowercase();
            let state = str_at(&attrs, &["state"]).to_lowercase();
            let event_type = if action == "close" || state == "closed" {
                EventType::MergeRequestClosed
            } else if action == "merge" || state == "merged" {
                EventType::MergeRequestMerged
            } else {
                EventType::MergeRequestUpdated
            };
            let base_ref = match str_at(&attrs, &["target_branch"]) {
                branch if branch.is_empty() => None,
                branch => Some(branch),
            };
            Ok(MergeRequestEvent {
                delivery_id,
                event_type,
                repository,
                merge_request_id,
                head_sha,
                base_ref,
                changed_files,
            })
        }
        "note" => {
            let note = str_at(&payload, &["object_attributes", "note"]);
            if !note.trim().starts_with("/thule plan") {
                return Err(PayloadError::new("unsupported note command"));
            }
            let merge_request = payload.get("merge_request").cloned().unwrap_or(Value::Null);
            let merge_request_id = int_at(&merge_request, &["iid"]);
            let mut head_sha = match merge_request.get("last_commit") {
                Some(Value::String(sha)) => sha.clone(),
                Some(other) => str_at(other, &["id"]),
                None => String::new(),
            };
            if head_sha.is_empty() {
                head_sha = str_at(&payload, &["head_sha"]);
            }
            Ok(MergeRequestEvent {
                delivery_id,
                event_type: EventType::CommentPlan,
                repository,
                merge_request_id,
                head_sha,
                base_ref: None,
                changed_files,
            })
        }
        "" => Err(PayloadError::new("missing object_kind")),
        other => Err(PayloadError::new(format!("unsupported event kind {other:?}"))),
    }
}

fn str_at(value: &Value, path: &[&str]) -> String {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    current.as_str().unwrap_or_default().to_string()
}

fn first_str(value: &Value, keys: &[&str]) -> String {
    for key in keys {
        let found = str_at(value, &[key]);
        if !found.is_empty() {
            return found;
        }
    }
    String::new()
}

fn int_at(value: &Value, path: &[&str]) -> i64 {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return 0,
        }
    }
    current.as_i64().unwrap_or_default()
}

fn str_array(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::to_string)
        .collect()
}
