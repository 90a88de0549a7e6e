use std::fmt;

use crate::render::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub resource_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
}

/// Flags resources that deserve human review before the plan is trusted.
/// Profiles select rule sets; an empty profile means "baseline".
pub trait PolicyEvaluator: Send + Sync {
    fn evaluate(&self, resources: &[Resource], profile: &str) -> Vec<Finding>;
}

#[derive(Default)]
pub struct BuiltinEvaluator;

impl BuiltinEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyEvaluator for BuiltinEvaluator {
    fn evaluate(&self, resources: &[Resource], profile: &str) -> Vec<Finding> {
        let profile = if profile.is_empty() {
            "baseline"
        } else {
            profile
        };
        let mut findings = Vec::new();
        for resource in resources {
            if resource.kind == "Secret" {
                findings.push(Finding {
                    resource_id: resource.id(),
                    rule_id: "review-secret-change".to_string(),
                    severity: Severity::Warn,
                    message: "Secret change detected; validate secret rotation and source of truth"
                        .to_string(),
                });
            }
            if profile == "strict" && resource.kind == "ClusterRoleBinding" {
                findings.push(Finding {
                    resource_id: resource.id(),
                    rule_id: "restrict-cluster-admin-bindings".to_string(),
                    severity: Severity::Error,
                    message: format!(
                        "cluster-wide RBAC binding change requires security review: {}",
                        resource.id()
                    ),
                });
            }
        }
        findings
    }
}
