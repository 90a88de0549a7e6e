use crate::diff::{ChangeAction, DiffSummary, ResourceChange};
use crate::policy::Finding;

const DEFAULT_MAX_RESOURCE_DETAILS: usize = 200;
const MAX_COMMENT_CHARS: usize = 900_000;
const MAX_YAML_CHARS_PER_BLOCK: usize = 12_000;

const READ_ONLY_FOOTER: &str =
    "\n> Thule is read-only and did not apply these changes. Flux or repository operators must reconcile/apply.\n";
const READ_ONLY_FOOTER_SHORT: &str = "\n> Thule is read-only and did not apply any changes.\n";

/// One project's slice of an aggregated plan.
#[derive(Debug, Clone)]
pub struct ProjectPlan {
    pub project: String,
    pub changes: Vec<ResourceChange>,
    pub summary: DiffSummary,
    pub findings: Vec<Finding>,
}

impl ProjectPlan {
    fn has_actionable_changes(&self) -> bool {
        self.summary.creates > 0
            || self.summary.patches > 0
            || self.summary.deletes > 0
            || !self.findings.is_empty()
    }
}

pub fn build_plan_comment(
    project: &str,
    sha: &str,
    changes: &[ResourceChange],
    summary: &DiffSummary,
    findings: &[Finding],
    max_resource_details: usize,
) -> String {
    let max_resource_details = effective_max(max_resource_details);
    let mut body = String::new();
    body.push_str("## Thule Plan\n\n");
    body.push_str(&format!("Project: `{project}`  \n"));
    body.push_str(&format!("Commit: `{sha}`\n\n"));
    body.push_str(&summary_line(summary));
    body.push_str("\n\n");
    append_plan_sections(
        &mut body,
        changes,
        findings,
        max_resource_details,
        "### Changes",
        "### Policy Findings",
    );
    body.push_str(READ_ONLY_FOOTER);
    body
}

pub fn build_aggregated_plan_comment(
    sha: &str,
    projects: &[ProjectPlan],
    max_resource_details: usize,
) -> String {
    let max_resource_details = effective_max(max_resource_details);
    if projects.is_empty() {
        return build_no_changes_comment(sha, &[], 0);
    }

    let mut visible: Vec<&ProjectPlan> = projects
        .iter()
        .filter(|plan| plan.has_actionable_changes())
        .collect();
    if visible.is_empty() {
        return build_no_diff_comment(sha, projects.len());
    }
    visible.sort_by(|a, b| a.project.cmp(&b.project));

    let mut total = DiffSummary::default();
    for plan in &visible {
        total.creates += plan.summary.creates;
        total.patches += plan.summary.patches;
        total.deletes += plan.summary.deletes;
        total.noops += plan.summary.noops;
    }

    let mut body = String::new();
    body.push_str("## Thule Plan\n\n");
    body.push_str(&format!("Commit: `{sha}`  \n"));
    body.push_str(&format!("Projects: `{}`\n\n", visible.len()));
    body.push_str(&summary_line(&total));
    body.push_str("\n\n");

    for (idx, plan) in visible.iter().enumerate() {
        if idx > 0 {
            body.push('\n');
        }
        let header = format!("### Project: `{}`\n", plan.project);
        if body.len() + header.len() > MAX_COMMENT_CHARS {
            body.push_str("\n- ... truncated (comment size limit)\n");
            break;
        }
        body.push_str(&header);
        let line = format!("{}\n\n", summary_line(&plan.summary));
        if body.len() + line.len() > MAX_COMMENT_CHARS {
            body.push_str("- ... truncated (comment size limit)\n");
            break;
        }
        body.push_str(&line);
        append_plan_sections(
            &mut body,
            &plan.changes,
            &plan.findings,
            max_resource_details,
            "#### Changes",
            "#### Policy Findings",
        );
    }

    body.push_str(READ_ONLY_FOOTER);
    body
}

pub fn build_no_changes_comment(sha: &str, changed_files: &[String], max_files: usize) -> String {
    let max_files = if max_files == 0 { 50 } else { max_files };
    let mut body = String::new();
    body.push_str("## Thule Plan\n\n");
    body.push_str(&format!("Commit: `{sha}`\n\n"));
    body.push_str("Summary: no diffs generated.\n");
    if changed_files.is_empty() {
        body.push_str("Reason: no changed files were detected for this event.\n\n");
    } else {
        body.push_str(
            "Reason: changed files did not map to rendered Kubernetes resources in configured Thule projects.\n\n",
        );
    }
    body.push_str("### Changed files\n");
    if changed_files.is_empty() {
        body.push_str("- none\n");
    } else {
        for (idx, file) in changed_files.iter().enumerate() {
            if idx >= max_files {
                body.push_str(&format!(
                    "- ... truncated ({} additional files)\n",
                    changed_files.len() - max_files
                ));
                break;
            }
            body.push_str(&format!("- `{file}`\n"));
        }
    }
    body.push_str(READ_ONLY_FOOTER_SHORT);
    body
}

pub fn build_no_diff_comment(sha: &str, discovered_projects: usize) -> String {
    let mut body = String::new();
    body.push_str("## Thule Plan\n\n");
    body.push_str(&format!("Commit: `{sha}`\n\n"));
    body.push_str("Summary: no CREATE/PATCH/DELETE changes for touched manifests.\n");
    if discovered_projects > 0 {
        body.push_str(&format!("Projects checked: `{discovered_projects}`\n"));
    }
    body.push_str(READ_ONLY_FOOTER_SHORT);
    body
}

fn effective_max(max_resource_details: usize) -> usize {
    if max_resource_details == 0 {
        DEFAULT_MAX_RESOURCE_DETAILS
    } else {
        max_resource_details
    }
}

fn append_plan_sections(
    body: &mut String,
    changes: &[ResourceChange],
    findings: &[Finding],
    max_resource_details: usize,
    changes_heading: &str,
    findings_heading: &str,
) {
    body.push_str(changes_heading);
    body.push('\n');

    let non_noop_total = changes
        .iter()
        .filter(|change| change.action != ChangeAction::NoOp)
        .count();
    let mut printed = 0;
    let mut size_truncated = false;
    for change in changes {
        if change.action == ChangeAction::NoOp {
            continue;
        }
        if printed >= max_resource_details {
            body.push_str(&format!(
                "- ... truncated ({} additional resources)\n",
                non_noop_total - printed
            ));
            break;
        }
        let mut line = format!("- `{}` {}", change.action, change.id);
        if !change.changed_keys.is_empty() {
            line.push_str(&format!(" changed=[{}]", change.changed_keys.join(" ")));
        }
        if !change.changed_paths.is_empty() {
            line.push_str(&format!(" paths=[{}]", change.changed_paths.join(" ")));
        }
        if !change.risks.is_empty() {
            line.push_str(&format!(" risks=[{}]", change.risks.join(" ")));
        }
        if body.len() + line.len() + 1 > MAX_COMMENT_CHARS {
            size_truncated = true;
            break;
        }
        body.push_str(&line);
        body.push('\n');
        let details = render_change_details(change);
        if !details.is_empty() {
            if body.len() + details.len() > MAX_COMMENT_CHARS {
                size_truncated = true;
                break;
            }
            body.push_str(&details);
        }
        printed += 1;
    }
    if size_truncated {
        body.push_str(&format!(
            "- ... truncated ({} additional resources; comment size limit)\n",
            non_noop_total - printed
        ));
    }
    if printed == 0 {
        body.push_str("- none\n");
    }

    body.push('\n');
    body.push_str(findings_heading);
    body.push('\n');
    if findings.is_empty() {
        body.push_str("- none\n");
        return;
    }
    for finding in findings {
        let line = format!(
            "- `{}` `{}` {} ({})\n",
            finding.severity, finding.rule_id, finding.message, finding.resource_id
        );
        if body.len() + line.len() > MAX_COMMENT_CHARS {
            body.push_str("- ... truncated (comment size limit)\n");
            return;
        }
        body.push_str(&line);
    }
}

fn summary_line(summary: &DiffSummary) -> String {
    format!(
        "Summary: CREATE={} PATCH={} DELETE={} NO-OP={}",
        summary.creates, summary.patches, summary.deletes, summary.noops
    )
}

fn render_change_details(change: &ResourceChange) -> String {
    match change.action {
        ChangeAction::Create => {
            if change.desired_yaml.is_empty() {
                return String::new();
            }
            format!(
                "\n```yaml\n# desired\n{}\n```\n",
                truncate_yaml_block(&change.desired_yaml)
            )
        }
        ChangeAction::Delete => {
            if change.current_yaml.is_empty() {
                return String::new();
            }
            format!(
                "\n```yaml\n# current\n{}\n```\n",
                truncate_yaml_block(&change.current_yaml)
            )
        }
        ChangeAction::Patch => {
            if !change.attribute_diff.is_empty() {
                return format!(
                    "\n```diff\n{}\n```\n",
                    truncate_diff_lines(&change.attribute_diff)
                );
            }
            let mut parts = Vec::new();
            if !change.current_yaml.is_empty() {
                parts.push(format!(
                    "```yaml\n# current\n{}\n```",
                    truncate_yaml_block(&change.current_yaml)
                ));
            }
            if !change.desired_yaml.is_empty() {
                parts.push(format!(
                    "```yaml\n# desired\n{}\n```",
                    truncate_yaml_block(&change.desired_yaml)
                ));
            }
            if parts.is_empty() {
                return String::new();
            }
            format!("\n{}\n", parts.join("\n"))
        }
        ChangeAction::NoOp => String::new(),
    }
}

fn truncate_yaml_block(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.len() <= MAX_YAML_CHARS_PER_BLOCK {
        return trimmed.to_string();
    }
    let cut = floor_char_boundary(trimmed, MAX_YAML_CHARS_PER_BLOCK);
    format!("{}\n# ... truncated ...", trimmed[..cut].trim())
}

fn truncate_diff_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let mut remaining = MAX_YAML_CHARS_PER_BLOCK;
    for (idx, line) in lines.iter().enumerate() {
        if idx > 0 {
            if remaining <= 1 {
                out.push_str("\n# ... truncated ...");
                break;
            }
            out.push('\n');
            remaining -= 1;
        }
        if line.len() <= remaining {
            out.push_str(line);
            remaining -= line.len();
            continue;
        }
        let cut = floor_char_boundary(line, remaining);
        out.push_str(&line[..cut]);
        out.push_str("\n# ... truncated ...");
        break;
    }
    out.trim().to_string()
}

fn floor_char_boundary(value: &str, index: usize) -> usize {
    let mut index = index.min(value.len());
    while index > 0 && !value.is_char_boundary(index) {
        index -= 1;
    }
    index
}
