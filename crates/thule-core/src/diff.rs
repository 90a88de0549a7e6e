use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::Value;

use crate::render::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Patch,
    Delete,
    NoOp,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "CREATE",
            ChangeAction::Patch => "PATCH",
            ChangeAction::Delete => "DELETE",
            ChangeAction::NoOp => "NO-OP",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChange {
    pub id: String,
    pub action: ChangeAction,
    pub changed_keys: Vec<String>,
    pub changed_paths: Vec<String>,
    pub attribute_diff: Vec<String>,
    pub risks: Vec<String>,
    pub current_yaml: String,
    pub desired_yaml: String,
}

impl ResourceChange {
    fn new(id: &str, action: ChangeAction) -> Self {
        Self {
            id: id.to_string(),
            action,
            changed_keys: Vec::new(),
            changed_paths: Vec::new(),
            attribute_diff: Vec::new(),
            risks: Vec::new(),
            current_yaml: String::new(),
            desired_yaml: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub patches: usize,
    pub deletes: usize,
    pub noops: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub prune_deletes: bool,
    pub ignore_fields: Vec<String>,
    /// Drops fields that only exist in live resources (API-server defaulted
    /// or computed attributes) before comparison.
    pub ignore_actual_extra_fields: bool,
}

/// Three-way-aware diff over normalized resource bodies, keyed purely by
/// resource id and processed in sorted order for deterministic output.
pub fn compute(
    desired: &[Resource],
    actual: &[Resource],
    opts: &DiffOptions,
) -> (Vec<ResourceChange>, DiffSummary) {
    let mut desired_by_id = BTreeMap::new();
    for resource in desired {
        desired_by_id.insert(resource.id(), normalize(resource, &opts.ignore_fields));
    }
    let mut actual_by_id = BTreeMap::new();
    for resource in actual {
        actual_by_id.insert(resource.id(), normalize(resource, &opts.ignore_fields));
    }

    let mut ids: BTreeSet<&String> = desired_by_id.keys().collect();
    ids.extend(actual_by_id.keys());

    let mut changes = Vec::new();
    let mut summary = DiffSummary::default();
    for id in ids {
        match (desired_by_id.get(id), actual_by_id.get(id)) {
            (Some(d), None) => {
                let mut change = ResourceChange::new(id, ChangeAction::Create);
                change.desired_yaml = to_yaml(&d.body);
                summary.creates += 1;
                changes.push(change);
            }
            (None, Some(a)) => {
                if !opts.prune_deletes {
                    continue;
                }
                let mut change = ResourceChange::new(id, ChangeAction::Delete);
                change.current_yaml = to_yaml(&a.body);
                summary.deletes += 1;
                changes.push(change);
            }
            (Some(d), Some(a)) => {
                let desired_body = &d.body;
                let mut actual_body = a.body.clone();
                if opts.ignore_actual_extra_fields {
                    actual_body = project_actual_to_desired(desired_body, &actual_body);
                }
                if desired_body == &actual_body {
                    summary.noops += 1;
                    changes.push(ResourceChange::new(id, ChangeAction::NoOp));
                    continue;
                }
                let mut change = ResourceChange::new(id, ChangeAction::Patch);
                change.changed_keys = changed_top_level_keys(desired_body, &actual_body);
                change.changed_paths = changed_field_paths(desired_body, &actual_body);
                change.attribute_diff = attribute_diff_lines(desired_body, &actual_body);
                change.risks = detect_risks(d, &change.changed_keys);
                change.current_yaml = to_yaml(&actual_body);
                change.desired_yaml = to_yaml(desired_body);
                summary.patches += 1;
                changes.push(change);
            }
            (None, None) => unreachable!("id came from one of the maps"),
        }
    }

    (changes, summary)
}

/// Strips server-managed noise so only meaningful drift survives the diff.
/// Applying normalization twice equals applying it once.
pub fn normalize(resource: &Resource, ignore_fields: &[String]) -> Resource {
    let mut out = resource.clone();
    let mut body = prune_nil_values(&resource.body);

    if let Some(map) = body.as_object_mut() {
        map.remove("status");
        if let Some(Value::Object(metadata)) = map.get_mut("metadata") {
            metadata.remove("managedFields");
            metadata.remove("resourceVersion");
            metadata.remove("uid");
            metadata.remove("creationTimestamp");
            metadata.remove("generation");
            if let Some(Value::Object(annotations)) = metadata.get_mut("annotations") {
                annotations.remove("kubectl.kubernetes.io/last-applied-configuration");
                if annotations.is_empty() {
                    metadata.remove("annotations");
                }
            }
            if let Some(Value::Object(labels)) = metadata.get_mut("labels") {
                labels.remove("kustomize.toolkit.fluxcd.io/name");
                labels.remove("kustomize.toolkit.fluxcd.io/namespace");
            }
        }
    }

    // API servers default the CRD conversion strategy to None; ignore the noise.
    if resource.kind == "CustomResourceDefinition" {
        if let Some(Value::Object(spec)) = body.get_mut("spec") {
            let defaulted = matches!(
                spec.get("conversion").and_then(|c| c.get("strategy")),
                Some(Value::String(strategy)) if strategy.eq_ignore_ascii_case("none")
            );
            if defaulted {
                spec.remove("conversion");
            }
        }
    }

    for path in ignore_fields {
        delete_path(&mut body, path);
    }

    out.body = body;
    out
}

/// Removes a dot-separated path, traversing maps only.
fn delete_path(body: &mut Value, path: &str) {
    let parts: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut current = body;
    for part in parents {
        match current.get_mut(part) {
            Some(next @ Value::Object(_)) => current = next,
            _ => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.remove(*last);
    }
}

fn changed_top_level_keys(desired: &Value, actual: &Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let desired_map = desired.as_object().unwrap_or(&empty);
    let actual_map = actual.as_object().unwrap_or(&empty);
    let mut keys: BTreeSet<&String> = desired_map.keys().collect();
    keys.extend(actual_map.keys());
    keys.into_iter()
        .filter(|key| desired_map.get(*key) != actual_map.get(*key))
        .cloned()
        .collect()
}

fn detect_risks(desired: &Resource, changed_keys: &[String]) -> Vec<String> {
    let mut risks = Vec::new();
    let workload = matches!(
        desired.kind.as_str(),
        "Deployment" | "StatefulSet" | "DaemonSet"
    );
    if workload && changed_keys.iter().any(|key| key == "spec") {
        risks.push("workload-spec-change".to_string());
    }
    if changed_keys.iter().any(|key| key == "metadata") {
        risks.push("metadata-change".to_string());
    }
    if desired.kind == "CustomResourceDefinition" {
        risks.push("crd-change".to_string());
    }
    risks
}

/// All leaf paths where the two trees disagree, dot-separated and sorted.
fn changed_field_paths(desired: &Value, actual: &Value) -> Vec<String> {
    let mut seen = BTreeSet::new();
    fn walk(path: &str, desired: &Value, actual: &Value, seen: &mut BTreeSet<String>) {
        if desired == actual {
            return;
        }
        if let (Value::Object(d), Value::Object(a)) = (desired, actual) {
            let mut keys: BTreeSet<&String> = d.keys().collect();
            keys.extend(a.keys());
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(
                    &child,
                    d.get(key).unwrap_or(&Value::Null),
                    a.get(key).unwrap_or(&Value::Null),
                    seen,
                );
            }
            return;
        }
        seen.insert(display_path(path).to_string());
    }
    walk("", desired, actual, &mut seen);
    seen.into_iter().collect()
}

/// Ordered `-`/`+` lines produced by a parallel walk of both trees.
/// Sequences of unequal length collapse into a single old/new pair.
fn attribute_diff_lines(desired: &Value, actual: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    fn walk(path: &str, desired: Option<&Value>, actual: Option<&Value>, lines: &mut Vec<String>) {
        match (desired, actual) {
            (Some(d), Some(a)) => {
                if let (Value::Object(dm), Value::Object(am)) = (d, a) {
                    let mut keys: BTreeSet<&String> = dm.keys().collect();
                    keys.extend(am.keys());
                    for key in keys {
                        let child = if path.is_empty() {
                            key.clone()
                        } else {
                            format!("{path}.{key}")
                        };
                        walk(&child, dm.get(key), am.get(key), lines);
                    }
                    return;
                }
                if let (Value::Array(ds), Value::Array(as_)) = (d, a) {
                    if ds.len() != as_.len() {
                        lines.push(format!("- {}: {}", display_path(path), format_value(a)));
                        lines.push(format!("+ {}: {}", display_path(path), format_value(d)));
                        return;
                    }
                    for (idx, (dv, av)) in ds.iter().zip(as_).enumerate() {
                        let child = format!("{}[{idx}]", display_path(path));
                        walk(&child, Some(dv), Some(av), lines);
                    }
                    return;
                }
                if d == a {
                    return;
                }
                lines.push(format!("- {}: {}", display_path(path), format_value(a)));
                lines.push(format!("+ {}: {}", display_path(path), format_value(d)));
            }
            (Some(d), None) => {
                lines.push(format!("+ {}: {}", display_path(path), format_value(d)));
            }
            (None, Some(a)) => {
                lines.push(format!("- {}: {}", display_path(path), format_value(a)));
            }
            (None, None) => {}
        }
    }
    walk("", Some(desired), Some(actual), &mut lines);
    lines
}

/// Projects `actual` onto the shape of `desired`: map keys absent from the
/// desired side are dropped, sequences pair elementwise up to the desired
/// length, scalars pass through. This hides server-defaulted fields
/// (`clusterIP`, `targetPort`, ...) without hiding real divergence.
fn project_actual_to_desired(desired: &Value, actual: &Value) -> Value {
    match desired {
        Value::Object(desired_map) => {
            let Value::Object(actual_map) = actual else {
                return actual.clone();
            };
            let mut out = serde_json::Map::new();
            for (key, desired_value) in desired_map {
                let Some(actual_value) = actual_map.get(key) else {
                    continue;
                };
                out.insert(
                    key.clone(),
                    project_actual_to_desired(desired_value, actual_value),
                );
            }
            Value::Object(out)
        }
        Value::Array(desired_items) => {
            let Value::Array(actual_items) = actual else {
                return actual.clone();
            };
            let mut out = Vec::with_capacity(desired_items.len());
            for (idx, desired_value) in desired_items.iter().enumerate() {
                match actual_items.get(idx) {
                    Some(actual_value) => {
                        out.push(project_actual_to_desired(desired_value, actual_value))
                    }
                    None => out.push(Value::Null),
                }
            }
            Value::Array(out)
        }
        _ => actual.clone(),
    }
}

/// Drops nil-valued keys recursively so explicit nulls and absent fields
/// compare equal.
fn prune_nil_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                if item.is_null() {
                    continue;
                }
                out.insert(key.clone(), prune_nil_values(item));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(prune_nil_values).collect()),
        other => other.clone(),
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn format_value(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
}

pub fn to_yaml(value: &Value) -> String {
    if value.is_null() {
        return String::new();
    }
    serde_yaml::to_string(value)
        .unwrap_or_else(|err| format!("# failed to marshal yaml: {err}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(kind: &str, name: &str, body: Value) -> Resource {
        Resource {
            api_version: "v1".to_string(),
            kind: kind.to_string(),
            namespace: "default".to_string(),
            name: name.to_string(),
            body,
            source_path: None,
        }
    }

    fn service(extra_actual_fields: bool) -> (Resource, Resource) {
        let desired = resource(
            "Service",
            "web",
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "Service",
                "metadata": {"name": "web", "namespace": "default"},
                "spec": {"ports": [{"port": 80, "protocol": "TCP"}]},
            }),
        );
        let mut actual_body = desired.body.clone();
        if extra_actual_fields {
            let spec = actual_body["spec"].as_object_mut().unwrap();
            spec.insert("clusterIP".to_string(), serde_json::json!("10.0.0.1"));
            spec.insert("clusterIPs".to_string(), serde_json::json!(["10.0.0.1"]));
            spec["ports"][0]
                .as_object_mut()
                .unwrap()
                .insert("targetPort".to_string(), serde_json::json!(8080));
        }
        let actual = Resource {
            body: actual_body,
            ..desired.clone()
        };
        (desired, actual)
    }

    #[test]
    fn identical_inputs_are_all_noops() {
        let (desired, _) = service(false);
        let inputs = vec![desired];
        let (changes, summary) = compute(&inputs, &inputs, &DiffOptions::default());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::NoOp);
        assert_eq!(summary.creates, 0);
        assert_eq!(summary.patches, 0);
        assert_eq!(summary.deletes, 0);
        assert_eq!(summary.noops, 1);
    }

    #[test]
    fn empty_actual_creates_everything() {
        let (desired, _) = service(false);
        let other = resource("ConfigMap", "cfg", serde_json::json!({"data": {"k": "v"}}));
        let (changes, summary) = compute(&[desired, other], &[], &DiffOptions::default());
        assert_eq!(summary.creates, 2);
        assert!(changes
            .iter()
            .all(|c| c.action == ChangeAction::Create));
        assert!(changes.iter().all(|c| !c.desired_yaml.is_empty()));
    }

    #[test]
    fn deletes_require_prune() {
        let (_, actual) = service(false);
        let opts = DiffOptions {
            prune_deletes: true,
            ..DiffOptions::default()
        };
        let (changes, summary) = compute(&[], std::slice::from_ref(&actual), &opts);
        assert_eq!(summary.deletes, 1);
        assert_eq!(changes[0].action, ChangeAction::Delete);

        let (changes, summary) = compute(&[], &[actual], &DiffOptions::default());
        assert!(changes.is_empty());
        assert_eq!(summary.deletes, 0);
    }

    #[test]
    fn projection_hides_server_defaulted_fields() {
        let (desired, actual) = service(true);
        let opts = DiffOptions {
            ignore_actual_extra_fields: true,
            ..DiffOptions::default()
        };
        let (changes, summary) = compute(
            std::slice::from_ref(&desired),
            std::slice::from_ref(&actual),
            &opts,
        );
        assert_eq!(changes[0].action, ChangeAction::NoOp);
        assert_eq!(summary.noops, 1);

        let (changes, summary) = compute(&[desired], &[actual], &DiffOptions::default());
        assert_eq!(changes[0].action, ChangeAction::Patch);
        assert_eq!(summary.patches, 1);
    }

    #[test]
    fn patch_carries_keys_paths_and_diff_lines() {
        let desired = resource(
            "Deployment",
            "web",
            serde_json::json!({
                "metadata": {"name": "web"},
                "spec": {"replicas": 3},
            }),
        );
        let actual = resource(
            "Deployment",
            "web",
            serde_json::json!({
                "metadata": {"name": "web"},
                "spec": {"replicas": 2},
            }),
        );
        let (changes, _) = compute(&[desired], &[actual], &DiffOptions::default());
        let change = &changes[0];
        assert_eq!(change.action, ChangeAction::Patch);
        assert_eq!(change.changed_keys, vec!["spec"]);
        assert_eq!(change.changed_paths, vec!["spec.replicas"]);
        assert_eq!(
            change.attribute_diff,
            vec!["- spec.replicas: 2", "+ spec.replicas: 3"]
        );
        assert_eq!(change.risks, vec!["workload-spec-change"]);
        assert!(change.current_yaml.contains("replicas: 2"));
        assert!(change.desired_yaml.contains("replicas: 3"));
    }

    #[test]
    fn unequal_sequences_emit_one_pair() {
        let desired = serde_json::json!({"items": [1, 2, 3]});
        let actual = serde_json::json!({"items": [1]});
        let lines = attribute_diff_lines(&desired, &actual);
        assert_eq!(lines, vec!["- items: [1]", "+ items: [1,2,3]"]);
    }

    #[test]
    fn metadata_and_crd_risks() {
        let desired = resource(
            "CustomResourceDefinition",
            "widgets.example.com",
            serde_json::json!({"metadata": {"name": "widgets.example.com", "labels": {"a": "b"}}}),
        );
        let actual = resource(
            "CustomResourceDefinition",
            "widgets.example.com",
            serde_json::json!({"metadata": {"name": "widgets.example.com"}}),
        );
        let (changes, _) = compute(&[desired], &[actual], &DiffOptions::default());
        assert_eq!(changes[0].risks, vec!["metadata-change", "crd-change"]);
    }

    #[test]
    fn normalization_strips_server_noise() {
        let raw = resource(
            "Deployment",
            "web",
            serde_json::json!({
                "metadata": {
                    "name": "web",
                    "managedFields": [{"manager": "kubectl"}],
                    "resourceVersion": "12345",
                    "uid": "abc-def",
                    "creationTimestamp": "2024-01-01T00:00:00Z",
                    "generation": 4,
                    "annotations": {
                        "kubectl.kubernetes.io/last-applied-configuration": "{}",
                    },
                    "labels": {
                        "kustomize.toolkit.fluxcd.io/name": "apps",
                        "kustomize.toolkit.fluxcd.io/namespace": "flux-system",
                        "team": "payments",
                    },
                },
                "spec": {"replicas": 2, "paused": null},
                "status": {"readyReplicas": 2},
            }),
        );
        let normalized = normalize(&raw, &[]);
        let body = &normalized.body;
        assert!(body.get("status").is_none());
        let metadata = body["metadata"].as_object().unwrap();
        assert!(metadata.get("managedFields").is_none());
        assert!(metadata.get("annotations").is_none());
        assert_eq!(
            metadata["labels"].as_object().unwrap().keys().len(),
            1,
            "only the user label survives"
        );
        assert!(body["spec"].get("paused").is_none());

        // Idempotent.
        assert_eq!(normalize(&normalized, &[]).body, normalized.body);
    }

    #[test]
    fn crd_defaulted_conversion_is_dropped() {
        let raw = resource(
            "CustomResourceDefinition",
            "widgets.example.com",
            serde_json::json!({
                "spec": {"conversion": {"strategy": "None"}, "group": "example.com"},
            }),
        );
        let normalized = normalize(&raw, &[]);
        assert!(normalized.body["spec"].get("conversion").is_none());
        assert!(normalized.body["spec"].get("group").is_some());

        let webhook = resource(
            "CustomResourceDefinition",
            "widgets.example.com",
            serde_json::json!({
                "spec": {"conversion": {"strategy": "Webhook"}},
            }),
        );
        let normalized = normalize(&webhook, &[]);
        assert!(normalized.body["spec"].get("conversion").is_some());
    }

    #[test]
    fn ignore_fields_delete_dot_paths() {
        let raw = resource(
            "ConfigMap",
            "cfg",
            serde_json::json!({
                "metadata": {"name": "cfg", "labels": {"team": "x"}},
                "data": {"k": "v"},
            }),
        );
        let normalized = normalize(&raw, &["metadata.labels.team".to_string()]);
        assert!(normalized.body["metadata"]["labels"].get("team").is_none());

        // Paths through non-maps are ignored rather than panicking.
        let normalized = normalize(&raw, &["data.k.deeper".to_string()]);
        assert_eq!(normalized.body["data"]["k"], "v");
    }
}
