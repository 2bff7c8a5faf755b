use super::run_git;
use crate::errors::HostError;
use git2::Repository;
use std::path::Path;

/// Create a detached worktree of `repo_path` at `worktree_path`, checked out
/// at `reference` (e.g. `origin/main`). `--force` tolerates a stale
/// registration left behind by an interrupted teardown.
pub async fn add_worktree(
    repo_path: &Path,
    worktree_path: &Path,
    reference: &str,
) -> Result<(), HostError> {
    let worktree_str = worktree_path
        .to_str()
        .ok_or_else(|| HostError::git("worktree", "worktree path contains invalid Unicode"))?;

    run_git(
        &[
            "worktree",
            "add",
            "--force",
            "--detach",
            worktree_str,
            reference,
        ],
        Some(repo_path),
    )
    .await?;

    log::debug!(
        "Added worktree {} at {reference}",
        worktree_path.display()
    );
    Ok(())
}

/// Remove a worktree registration and its directory. Missing registrations
/// and already-deleted directories are tolerated; the caller only cares that
/// neither exists afterwards.
pub async fn remove_worktree(repo_path: &Path, worktree_path: &Path) -> Result<(), HostError> {
    let worktree_str = worktree_path
        .to_str()
        .ok_or_else(|| HostError::git("worktree", "worktree path contains invalid Unicode"))?;

    match run_git(
        &["worktree", "remove", "--force", worktree_str],
        Some(repo_path),
    )
    .await
    {
        Ok(_) => {}
        Err(err) => {
            log::debug!(
                "git worktree remove for {} reported: {err}; falling back to prune",
                worktree_path.display()
            );
            if worktree_path.exists() {
                std::fs::remove_dir_all(worktree_path)
                    .map_err(|e| HostError::io("remove worktree", worktree_path.display(), e))?;
            }
            prune_worktrees(repo_path).await?;
        }
    }

    Ok(())
}

/// Drop registrations whose directories no longer exist.
pub async fn prune_worktrees(repo_path: &Path) -> Result<(), HostError> {
    run_git(&["worktree", "prune"], Some(repo_path)).await?;
    Ok(())
}

/// Whether `worktree_path` is registered as a worktree of `repo_path`.
pub fn is_worktree_registered(repo_path: &Path, worktree_path: &Path) -> Result<bool, HostError> {
    let repo =
        Repository::open(repo_path).map_err(|e| HostError::git("worktree list", e.message()))?;
    let worktrees = repo
        .worktrees()
        .map_err(|e| HostError::git("worktree list", e.message()))?;

    let canonical_target = worktree_path
        .canonicalize()
        .unwrap_or_else(|_| worktree_path.to_path_buf());

    for name in worktrees.iter().flatten() {
        if let Ok(worktree) = repo.find_worktree(name) {
            let path = worktree.path();
            let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            if canonical == canonical_target || path == worktree_path {
                return Ok(true);
            }
        }
    }

    Ok(false)
}
