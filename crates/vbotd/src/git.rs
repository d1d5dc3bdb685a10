//! Repository synchronization before a test run.
//!
//! Machines test whatever is checked out in the repository, so `run`
//! switches to the requested branch and pulls before starting them.

use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("invalid utf-8 in git output")]
    InvalidUtf8,
    #[error("refusing branch name {0:?}")]
    InvalidBranch(String),
    #[error("refusing repository url {0:?}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Run `git <args>` in `repo`, returning trimmed stdout.
fn git(repo: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(repo).output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitError::CommandFailed(format!(
            "git {}: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| GitError::InvalidUtf8)?;
    Ok(stdout.trim().to_string())
}

/// Name of the currently checked-out branch.
pub fn current_branch(repo: &Path) -> Result<String> {
    git(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Reject names git would parse as options or as revision ranges.
pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.starts_with('-') || branch.contains("..") {
        return Err(GitError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

/// Check out `branch`. Remote-only branches get a tracking branch.
pub fn checkout(repo: &Path, branch: &str) -> Result<()> {
    validate_branch(branch)?;
    git(repo, &["checkout", branch, "--"]).map(|_| ())
}

/// Pull the current branch from its upstream.
pub fn pull(repo: &Path) -> Result<()> {
    git(repo, &["pull", "--ff-only"]).map(|_| ())
}

/// Make `branch` the checked-out branch and bring it up to date.
pub fn checkout_pull_branch(repo: &Path, branch: &str) -> Result<()> {
    validate_branch(branch)?;
    let current = current_branch(repo)?;
    if current != branch {
        info!(repo = %repo.display(), from = %current, to = %branch, "switching branch");
        checkout(repo, branch)?;
    }
    pull(repo)?;
    info!(repo = %repo.display(), branch = %branch, "repository up to date");
    Ok(())
}

/// Whether `repo` is the top of a git checkout.
pub fn is_checkout(repo: &Path) -> bool {
    repo.join(".git").exists()
}

/// Clone `url` into `dest`, which must be missing or empty.
pub fn clone(url: &str, dest: &Path) -> Result<()> {
    if url.is_empty() || url.starts_with('-') {
        return Err(GitError::InvalidUrl(url.to_string()));
    }
    std::fs::create_dir_all(dest)?;
    git(dest, &["clone", "--quiet", "--", url, "."]).map(|_| ())
}

/// Clone `url` into `repo` unless it already is a checkout.
///
/// Returns whether a clone happened.
pub fn ensure_checkout(repo: &Path, url: &str) -> Result<bool> {
    if is_checkout(repo) {
        return Ok(false);
    }
    info!(repo = %repo.display(), url = %url, "cloning repository");
    clone(url, repo)?;
    Ok(true)
}
