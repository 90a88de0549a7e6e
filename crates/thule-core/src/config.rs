use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const RENDER_MODES: &[&str] = &["yaml", "kustomize", "helm", "flux"];

/// Per-project `thule.conf`, accepted as either YAML or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThuleConfig {
    pub version: String,
    pub project: String,
    #[serde(rename = "clusterRef")]
    pub cluster_ref: String,
    pub namespace: String,
    pub render: RenderConfig,
    pub diff: DiffConfig,
    pub policy: PolicyConfig,
    pub comment: CommentConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub mode: String,
    pub path: String,
    pub helm: HelmConfig,
    pub flux: FluxConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmConfig {
    #[serde(rename = "releaseName")]
    pub release_name: String,
    #[serde(rename = "valuesFiles")]
    pub values_files: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    #[serde(rename = "includeKinds")]
    pub include_kinds: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub prune: bool,
    #[serde(rename = "ignoreFields")]
    pub ignore_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub profile: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommentConfig {
    #[serde(rename = "maxResourceDetails")]
    pub max_resource_details: usize,
}

pub fn load(path: &Path) -> Result<ThuleConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config = decode(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn decode(content: &str) -> Result<ThuleConfig, ConfigError> {
    if let Ok(config) = serde_json::from_str::<ThuleConfig>(content) {
        return Ok(config);
    }
    serde_yaml::from_str(content).map_err(|err| ConfigError::Decode {
        message: err.to_string(),
    })
}

pub fn validate(config: &ThuleConfig) -> Result<(), ConfigError> {
    if config.version.is_empty()
        || config.project.is_empty()
        || config.cluster_ref.is_empty()
        || config.namespace.is_empty()
    {
        return Err(ConfigError::Invalid {
            message: "missing required top-level fields: version, project, clusterRef, namespace"
                .to_string(),
        });
    }
    if !RENDER_MODES.contains(&config.render.mode.as_str()) {
        return Err(ConfigError::Invalid {
            message: format!("unsupported render.mode {:?}", config.render.mode),
        });
    }
    if config.render.path.is_empty() {
        return Err(ConfigError::Invalid {
            message: "render.path is required".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_YAML: &str = "\
version: v1
project: payments
clusterRef: prod-east
namespace: payments
render:
  mode: yaml
  path: manifests
diff:
  prune: true
  ignoreFields:
    - metadata.labels.team
policy:
  profile: strict
comment:
  maxResourceDetails: 25
";

    #[test]
    fn yaml_config_decodes() {
        let config = decode(VALID_YAML).unwrap();
        assert_eq!(config.project, "payments");
        assert_eq!(config.cluster_ref, "prod-east");
        assert_eq!(config.render.mode, "yaml");
        assert!(config.diff.prune);
        assert_eq!(config.diff.ignore_fields, vec!["metadata.labels.team"]);
        assert_eq!(config.policy.profile, "strict");
        assert_eq!(config.comment.max_resource_details, 25);
        validate(&config).unwrap();
    }

    #[test]
    fn json_config_decodes() {
        let content = r#"{
            "version": "v1",
            "project": "billing",
            "clusterRef": "prod-west",
            "namespace": "billing",
            "render": {"mode": "flux", "path": "clusters/prod"}
        }"#;
        let config = decode(content).unwrap();
        assert_eq!(config.project, "billing");
        assert_eq!(config.render.mode, "flux");
        validate(&config).unwrap();
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let config = decode("version: v1\nproject: p\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unknown_render_mode_is_rejected() {
        let content = "\
version: v1
project: p
clusterRef: c
namespace: n
render:
  mode: jsonnet
  path: manifests
";
        let err = validate(&decode(content).unwrap()).unwrap_err();
        assert!(err.to_string().contains("render.mode"));
    }

    #[test]
    fn missing_render_path_is_rejected() {
        let content = "\
version: v1
project: p
clusterRef: c
namespace: n
render:
  mode: yaml
";
        let err = validate(&decode(content).unwrap()).unwrap_err();
        assert!(err.to_string().contains("render.path"));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thule.conf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(VALID_YAML.as_bytes()).unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.project, "payments");

        let missing = load(&dir.path().join("absent.conf"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
