use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::config::ThuleConfig;
use crate::error::RenderError;

/// Kinds Flux reconciles; the `flux` render mode keeps only these plus any
/// user-listed kinds.
const FLUX_KINDS: &[&str] = &[
    "HelmRelease",
    "Kustomization",
    "GitRepository",
    "OCIRepository",
];

/// A rendered Kubernetes resource. The body is a free-form tree; the typed
/// fields exist only to key the diff.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub body: Value,
    pub source_path: Option<PathBuf>,
}

impl Resource {
    /// The pipe-joined identity tuple; the sole key used for diffing.
    pub fn id(&self) -> String {
        let namespace = if self.namespace.is_empty() {
            "_cluster"
        } else {
            &self.namespace
        };
        format!(
            "{}|{}|{}|{}",
            self.api_version, self.kind, namespace, self.name
        )
    }
}

pub fn render_project(
    project_root: &Path,
    config: &ThuleConfig,
) -> Result<Vec<Resource>, RenderError> {
    let target = project_root.join(&config.render.path);
    match config.render.mode.as_str() {
        "yaml" | "kustomize" | "helm" => render_yaml_path(&target),
        "flux" => {
            let resources = render_yaml_path(&target)?;
            Ok(filter_flux_resources(resources, config))
        }
        other => Err(RenderError::UnsupportedMode {
            mode: other.to_string(),
        }),
    }
}

fn filter_flux_resources(resources: Vec<Resource>, config: &ThuleConfig) -> Vec<Resource> {
    if config.render.flux.include_kinds.is_empty() {
        return resources;
    }
    resources
        .into_iter()
        .filter(|resource| {
            FLUX_KINDS.contains(&resource.kind.as_str())
                || config
                    .render
                    .flux
                    .include_kinds
                    .iter()
                    .any(|kind| kind == &resource.kind)
        })
        .collect()
}

fn render_yaml_path(path: &Path) -> Result<Vec<Resource>, RenderError> {
    let metadata = std::fs::metadata(path).map_err(|source| RenderError::Path {
        path: path.display().to_string(),
        source,
    })?;

    let mut files = Vec::new();
    if metadata.is_dir() {
        collect_yaml_files(path, &mut files).map_err(|source| RenderError::Path {
            path: path.display().to_string(),
            source,
        })?;
        files.sort();
    } else {
        files.push(path.to_path_buf());
    }

    let mut out = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file).map_err(|source| RenderError::Path {
            path: file.display().to_string(),
            source,
        })?;
        match parse_yaml_documents(&content, Some(&file)) {
            Ok(resources) => out.extend(resources),
            Err(message) => {
                // Values files and scripts with template syntax are expected
                // to fail; only manifest-shaped files fail the render.
                if looks_like_kubernetes_manifest(&content) {
                    return Err(RenderError::Parse {
                        path: file.display().to_string(),
                        message,
                    });
                }
            }
        }
    }
    Ok(out)
}

fn collect_yaml_files(root: &Path, out: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        if entry.metadata()?.is_dir() {
            collect_yaml_files(&path, out)?;
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".yaml") || name.ends_with(".yml") {
            out.push(path);
        }
    }
    Ok(())
}

/// Decodes every YAML document in `content`, keeping only documents that
/// carry a non-empty `apiVersion`, `kind`, and `metadata.name`.
pub fn parse_yaml_documents(
    content: &str,
    source_path: Option<&Path>,
) -> Result<Vec<Resource>, String> {
    let mut out = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let yaml: serde_yaml::Value =
            serde_yaml::Value::deserialize(document).map_err(|err| err.to_string())?;
        if yaml.is_null() {
            continue;
        }
        let body: Value = serde_json::to_value(&yaml).map_err(|err| err.to_string())?;
        if !body.is_object() {
            continue;
        }

        let api_version = str_at(&body, &["apiVersion"]);
        let kind = str_at(&body, &["kind"]);
        let name = str_at(&body, &["metadata", "name"]);
        let namespace = str_at(&body, &["metadata", "namespace"]);
        if api_version.is_empty() || kind.is_empty() || name.is_empty() {
            // Skip non-resource YAML (values files, kustomize configs, etc.).
            continue;
        }
        out.push(Resource {
            api_version,
            kind,
            namespace,
            name,
            body,
            source_path: source_path.map(Path::to_path_buf),
        });
    }
    Ok(out)
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

fn looks_like_kubernetes_manifest(content: &str) -> bool {
    let has_line = |prefix: &str| {
        content.lines().any(|line| {
            line.strip_prefix(prefix)
                .is_some_and(|rest| !rest.trim().is_empty())
        })
    };
    has_line("apiVersion:") && has_line("kind:")
}
