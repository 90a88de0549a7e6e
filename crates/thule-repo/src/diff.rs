use std::collections::BTreeSet;
use std::path::Path;

use gix::bstr::ByteSlice;
use gix::ObjectId;

use crate::{git_error, RepoError};

/// Lists the paths that differ between the merge base of `base_ref`/`head_sha`
/// and the head commit, sorted and deduplicated, preferring the new path of
/// renames.
pub fn changed_files(
    repo_dir: &Path,
    base_ref: &str,
    head_sha: &str,
) -> Result<Vec<String>, RepoError> {
    if repo_dir.as_os_str().is_empty() {
        return Err(RepoError::MissingDir);
    }
    if head_sha.is_empty() {
        return Err(RepoError::MissingHead);
    }
    let repo = gix::open(repo_dir).map_err(|err| RepoError::Open {
        dir: repo_dir.display().to_string(),
        message: err.to_string(),
    })?;

    let base_id = resolve_ref(&repo, base_ref)?;
    let head_id =
        ObjectId::from_hex(head_sha.as_bytes()).map_err(git_error("parse head sha"))?;

    // A detached base (force-pushed branch) falls back to the ref tip.
    let merge_base = repo
        .merge_base(base_id, head_id)
        .map(|id| id.detach())
        .unwrap_or(base_id);

    let base_tree = repo
        .find_commit(merge_base)
        .map_err(git_error("load base commit"))?
        .tree()
        .map_err(git_error("base tree"))?;
    let head_tree = repo
        .find_commit(head_id)
        .map_err(git_error("load head commit"))?
        .tree()
        .map_err(git_error("head tree"))?;

    let changes = repo
        .diff_tree_to_tree(&base_tree, &head_tree, None)
        .map_err(git_error("tree diff"))?;

    let mut paths = BTreeSet::new();
    for change in changes {
        match change {
            gix::object::tree::diff::ChangeDetached::Addition { location, .. }
            | gix::object::tree::diff::ChangeDetached::Deletion { location, .. }
            | gix::object::tree::diff::ChangeDetached::Modification { location, .. } => {
                paths.insert(location.to_str_lossy().into_owned());
            }
            gix::object::tree::diff::ChangeDetached::Rewrite { location, .. } => {
                paths.insert(location.to_str_lossy().into_owned());
            }
        }
    }
    Ok(paths.into_iter().collect())
}

/// Resolves a base reference, trying `refs/<exact>`, then the
/// remote-tracking branch, then the local branch. Remote-tracking wins over
/// local because local branches go stale in long-lived worker clones.
fn resolve_ref(repo: &gix::Repository, reference: &str) -> Result<ObjectId, RepoError> {
    if reference.is_empty() {
        return Err(RepoError::BaseRefNotFound {
            reference: reference.to_string(),
        });
    }
    if looks_like_object_id(reference) {
        return ObjectId::from_hex(reference.as_bytes()).map_err(git_error("parse base sha"));
    }

    let candidates = if reference.starts_with("refs/") {
        vec![reference.to_string()]
    } else {
        vec![
            format!("refs/remotes/origin/{reference}"),
            format!("refs/heads/{reference}"),
        ]
    };
    for name in candidates {
        if let Ok(mut found) = repo.find_reference(&name) {
            let id = found
                .peel_to_id_in_place()
                .map_err(git_error("peel base ref"))?;
            return Ok(id.detach());
        }
    }
    Err(RepoError::BaseRefNotFound {
        reference: reference.to_string(),
    })
}

fn looks_like_object_id(value: &str) -> bool {
    value.len() == 40 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
