use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    RequestChanges,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::RequestChanges => "request_changes",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub merge_request_id: i64,
    pub sha: String,
    pub decision: ApprovalDecision,
    pub reason: String,
}

/// Records review decisions against a merge request. Thule never approves
/// anything itself; operators and tests use this to track decisions taken
/// alongside a plan.
pub trait Approver: Send + Sync {
    fn set_approval(&self, record: ApprovalRecord);
    fn list_approvals(&self, merge_request_id: i64) -> Vec<ApprovalRecord>;
}

#[derive(Default)]
pub struct MemoryApprover {
    records: Mutex<Vec<ApprovalRecord>>,
}

impl MemoryApprover {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Approver for MemoryApprover {
    fn set_approval(&self, record: ApprovalRecord) {
        self.records.lock().unwrap().push(record);
    }

    fn list_approvals(&self, merge_request_id: i64) -> Vec<ApprovalRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.merge_request_id == merge_request_id)
            .cloned()
            .collect()
    }
}
