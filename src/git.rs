//! Version-control fingerprint for scanned roots.
//!
//! When a reindex scans paths inside a git worktree, the index records which
//! commit (and how dirty a tree) produced it. Everything here is best-effort:
//! a missing `git` binary or a failing subcommand yields `None`, never an
//! error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitFingerprint {
    pub worktree: String,
    pub head: Option<String>,
    pub branch: Option<String>,
    pub is_dirty: bool,
    pub multi_repo: bool,
    pub worktrees: Vec<String>,
}

/// Combine the fingerprints of all scanned roots into one record: the first
/// root inside a worktree provides the primary fields, and the full sorted
/// worktree list records whether the scan spanned repositories.
pub fn combined_fingerprint(roots: &[impl AsRef<Path>]) -> Option<GitFingerprint> {
    let fingerprints: Vec<GitFingerprint> = roots
        .iter()
        .filter_map(|root| fingerprint(root.as_ref()))
        .collect();

    let mut primary = fingerprints.first()?.clone();
    let worktrees: BTreeSet<String> = fingerprints.iter().map(|fp| fp.worktree.clone()).collect();
    primary.multi_repo = worktrees.len() > 1;
    primary.worktrees = worktrees.into_iter().collect();
    Some(primary)
}

/// Fingerprint a single path, or `None` when it is not inside a worktree.
pub fn fingerprint(path: &Path) -> Option<GitFingerprint> {
    let mut dir = path.to_path_buf();
    if dir.is_file() {
        dir.pop();
    }

    let has_git_ancestor = dir.ancestors().any(|candidate| candidate.join(".git").exists());
    if !has_git_ancestor {
        return None;
    }

    let worktree = run_git(&dir, &["rev-parse", "--show-toplevel"])?;
    let head = run_git(&dir, &["rev-parse", "HEAD"]);
    let branch = run_git(&dir, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let is_dirty = run_git(&dir, &["status", "--porcelain"])
        .map(|out| !out.is_empty())
        .unwrap_or(false);

    Some(GitFingerprint {
        worktree,
        head,
        branch,
        is_dirty,
        multi_repo: false,
        worktrees: Vec::new(),
    })
}

fn run_git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_worktree_path_has_no_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(fingerprint(tmp.path()).is_none());
        let roots: Vec<std::path::PathBuf> = vec![tmp.path().to_path_buf()];
        assert!(combined_fingerprint(&roots).is_none());
    }
}
