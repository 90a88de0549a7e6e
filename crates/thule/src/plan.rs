use std::path::Path;

use thule_core::diff::{self, DiffOptions};
use thule_core::policy::PolicyEvaluator;
use thule_core::{config, render, report, BuiltinEvaluator};

/// Local plan preview: render the project, diff against an empty cluster,
/// and print the single-project comment body.
pub fn run_plan(project: &Path, sha: &str) -> Result<String, String> {
    let config_path = project.join("thule.conf");
    let cfg = config::load(&config_path).map_err(|err| format!("load config: {err}"))?;
    let desired =
        render::render_project(project, &cfg).map_err(|err| format!("render project: {err}"))?;
    let (changes, summary) = diff::compute(
        &desired,
        &[],
        &DiffOptions {
            prune_deletes: cfg.diff.prune,
            ignore_fields: cfg.diff.ignore_fields.clone(),
            ignore_actual_extra_fields: false,
        },
    );
    let findings = BuiltinEvaluator::new().evaluate(&desired, &cfg.policy.profile);
    let body = report::build_plan_comment(
        &cfg.project,
        sha,
        &changes,
        &summary,
        &findings,
        cfg.comment.max_resource_details,
    );
    Ok(body.trim().to_string())
}
