use std::collections::BTreeSet;

pub const CONFIG_FILENAME: &str = "thule.conf";

/// A candidate project root derived from a changed file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DiscoveredProject {
    pub root: String,
    pub config_path: String,
}

/// Walks from each changed file up to the repository root, proposing a
/// `thule.conf` at every level. Candidates are deduplicated and returned
/// sorted by config path; whether a candidate is a real project is decided
/// later by checking the config file on disk.
pub fn discover_from_changed_files(changed_files: &[String]) -> Vec<DiscoveredProject> {
    let mut candidates = BTreeSet::new();
    for file in changed_files {
        let cleaned = clean_path(file);
        if cleaned.is_empty() {
            continue;
        }
        let mut dir = parent_dir(&cleaned);
        loop {
            candidates.insert(join(&dir, CONFIG_FILENAME));
            if dir.is_empty() {
                break;
            }
            dir = parent_dir(&dir);
        }
    }

    candidates
        .into_iter()
        .map(|config_path| DiscoveredProject {
            root: parent_or_dot(&config_path),
            config_path,
        })
        .collect()
}

/// Normalizes a repo-relative path: forward slashes, no leading `./`,
/// no empty or `.` segments.
pub fn clean_path(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn parent_or_dot(path: &str) -> String {
    let parent = parent_dir(path);
    if parent.is_empty() {
        ".".to_string()
    } else {
        parent
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_every_parent_directory() {
        let changed = vec!["apps/payments/deploy.yaml".to_string()];
        let projects = discover_from_changed_files(&changed);
        let configs: Vec<&str> = projects.iter().map(|p| p.config_path.as_str()).collect();
        assert_eq!(
            configs,
            vec!["apps/payments/thule.conf", "apps/thule.conf", "thule.conf"]
        );
        assert_eq!(projects[0].root, "apps/payments");
        assert_eq!(projects[2].root, ".");
    }

    #[test]
    fn candidates_are_deduplicated_across_files() {
        let changed = vec![
            "apps/payments/deploy.yaml".to_string(),
            "apps/payments/service.yaml".to_string(),
            "apps/billing/deploy.yaml".to_string(),
        ];
        let projects = discover_from_changed_files(&changed);
        let configs: Vec<&str> = projects.iter().map(|p| p.config_path.as_str()).collect();
        assert_eq!(
            configs,
            vec![
                "apps/billing/thule.conf",
                "apps/payments/thule.conf",
                "apps/thule.conf",
                "thule.conf",
            ]
        );
    }

    #[test]
    fn root_level_file_proposes_the_repo_root() {
        let projects = discover_from_changed_files(&["deploy.yaml".to_string()]);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].config_path, "thule.conf");
        assert_eq!(projects[0].root, ".");
    }

    #[test]
    fn blank_entries_are_ignored() {
        let projects = discover_from_changed_files(&["  ".to_string(), String::new()]);
        assert!(projects.is_empty());
    }

    #[test]
    fn paths_are_cleaned_before_walking() {
        let projects = discover_from_changed_files(&["./apps//p/x.yaml".to_string()]);
        let configs: Vec<&str> = projects.iter().map(|p| p.config_path.as_str()).collect();
        assert_eq!(
            configs,
            vec!["apps/p/thule.conf", "apps/thule.conf", "thule.conf"]
        );
    }
}
