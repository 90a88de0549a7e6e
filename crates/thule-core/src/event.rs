use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "merge_request.updated")]
    MergeRequestUpdated,
    #[serde(rename = "merge_request.closed")]
    MergeRequestClosed,
    #[serde(rename = "merge_request.merged")]
    MergeRequestMerged,
    #[serde(rename = "comment.plan")]
    CommentPlan,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MergeRequestUpdated => "merge_request.updated",
            EventType::MergeRequestClosed => "merge_request.closed",
            EventType::MergeRequestMerged => "merge_request.merged",
            EventType::CommentPlan => "comment.plan",
        }
    }

    /// Close and merge events release locks instead of planning.
    pub fn is_close(&self) -> bool {
        matches!(
            self,
            EventType::MergeRequestClosed | EventType::MergeRequestMerged
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "merge_request.updated" => Ok(EventType::MergeRequestUpdated),
            "merge_request.closed" => Ok(EventType::MergeRequestClosed),
            "merge_request.merged" => Ok(EventType::MergeRequestMerged),
            "comment.plan" => Ok(EventType::CommentPlan),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// The normalized internal event every webhook shape is reduced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequestEvent {
    pub delivery_id: String,
    pub event_type: EventType,
    pub repository: String,
    pub merge_request_id: i64,
    pub head_sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<String>,
}

impl MergeRequestEvent {
    /// Deterministic logical fingerprint used by the dedupe store to
    /// suppress redeliveries that arrive under fresh delivery ids.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.repository, self.merge_request_id, self.head_sha, self.event_type
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_round_trips_through_serde() {
        let encoded = serde_json::to_string(&EventType::CommentPlan).unwrap();
        assert_eq!(encoded, "\"comment.plan\"");
        let decoded: EventType = serde_json::from_str("\"merge_request.merged\"").unwrap();
        assert_eq!(decoded, EventType::MergeRequestMerged);
        assert!(serde_json::from_str::<EventType>("\"push\"").is_err());
    }

    #[test]
    fn close_detection() {
        assert!(EventType::MergeRequestClosed.is_close());
        assert!(EventType::MergeRequestMerged.is_close());
        assert!(!EventType::MergeRequestUpdated.is_close());
        assert!(!EventType::CommentPlan.is_close());
    }

    #[test]
    fn fingerprint_is_stable() {
        let event = MergeRequestEvent {
            delivery_id: "d-1".to_string(),
            event_type: EventType::MergeRequestUpdated,
            repository: "org/repo".to_string(),
            merge_request_id: 42,
            head_sha: "abc".to_string(),
            base_ref: None,
            changed_files: Vec::new(),
        };
        assert_eq!(event.fingerprint(), "org/repo|42|abc|merge_request.updated");
    }
}
