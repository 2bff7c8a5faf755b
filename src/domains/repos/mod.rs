use crate::domains::git::{remote::sanitize_remote, run_git_streaming};
use crate::domains::resources::Resource;
use crate::errors::HostError;
use git2::Repository;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Central clone cache under `<reposDir>/<name>`. The cache is the only
/// writer of that tree; all access to one entry serialises on a per-name
/// lock, while different entries fetch in parallel.
pub struct RepoCache {
    repos_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RepoCache {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.repos_dir.join(name)
    }

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Bring the central clone for `resource` up to date: clone it if the
    /// entry is absent, otherwise fetch. The working copy is never touched;
    /// all reads go through worktrees. No retries happen here.
    pub async fn ensure_fresh(&self, resource: &Resource, quiet: bool) -> Result<(), HostError> {
        let lock = self.lock_for(&resource.name).await;
        let _guard = lock.lock().await;

        let path = self.repo_path(&resource.name);
        if path.exists() {
            self.validate_origin(&path, resource)?;
            self.fetch(&path, resource, quiet).await
        } else {
            self.clone_fresh(&path, resource, quiet).await
        }
    }

    /// The entry must be a git repository whose `origin` remote matches the
    /// registered URL; anything else means the cache and the registry have
    /// diverged and re-cloning is the user's call.
    fn validate_origin(&self, path: &Path, resource: &Resource) -> Result<(), HostError> {
        let repo = Repository::open(path).map_err(|e| HostError::RepoCorrupt {
            name: resource.name.clone(),
            message: format!("not a git repository: {}", e.message()),
        })?;

        let remote = repo
            .find_remote("origin")
            .map_err(|_| HostError::RepoCorrupt {
                name: resource.name.clone(),
                message: "no 'origin' remote".to_string(),
            })?;

        match remote.url() {
            Some(url) if url == resource.origin => Ok(()),
            Some(url) => Err(HostError::RepoCorrupt {
                name: resource.name.clone(),
                message: format!(
                    "origin remote points at {}, resource is registered as {}",
                    sanitize_remote(url).display,
                    sanitize_remote(&resource.origin).display
                ),
            }),
            None => Err(HostError::RepoCorrupt {
                name: resource.name.clone(),
                message: "origin remote has no URL".to_string(),
            }),
        }
    }

    async fn fetch(&self, path: &Path, resource: &Resource, quiet: bool) -> Result<(), HostError> {
        log::debug!("Fetching origin for '{}'", resource.name);
        run_git_streaming(&["fetch", "origin"], Some(path), |line| {
            progress_line(&resource.name, line, quiet)
        })
        .await
        .map_err(|e| HostError::network("fetch", e))
    }

    async fn clone_fresh(
        &self,
        path: &Path,
        resource: &Resource,
        quiet: bool,
    ) -> Result<(), HostError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HostError::io("create repos dir", parent.display(), e))?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| HostError::git("clone", "destination path contains invalid Unicode"))?;

        log::info!(
            "Cloning '{}' from {}",
            resource.name,
            sanitize_remote(&resource.origin).display
        );

        let result = run_git_streaming(
            &[
                "clone",
                "--origin",
                "origin",
                "--progress",
                &resource.origin,
                path_str,
            ],
            None,
            |line| progress_line(&resource.name, line, quiet),
        )
        .await;

        if let Err(err) = result {
            // A half-written clone must not masquerade as a cache entry.
            let _ = std::fs::remove_dir_all(path);
            return Err(HostError::network("clone", err));
        }

        Ok(())
    }
}

fn progress_line(name: &str, line: &str, quiet: bool) {
    if quiet {
        log::debug!("[{name}] {line}");
    } else {
        log::info!("[{name}] {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .expect("git invocation");
        assert!(status.success(), "git {args:?} failed");
    }

    fn setup_origin(tmp: &TempDir, name: &str) -> PathBuf {
        let origin = tmp.path().join(format!("{name}-origin"));
        std::fs::create_dir_all(&origin).unwrap();
        git(&origin, &["init", "--initial-branch", "main"]);
        git(&origin, &["config", "user.email", "test@example.com"]);
        git(&origin, &["config", "user.name", "Test User"]);
        std::fs::write(origin.join("README.md"), "# sample").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "-m", "initial"]);
        origin
    }

    fn resource_for(origin: &Path, name: &str) -> Resource {
        Resource {
            name: name.to_string(),
            origin: origin.to_string_lossy().to_string(),
            branch: "main".to_string(),
            notes: None,
            subpath: None,
        }
    }

    #[tokio::test]
    async fn ensure_fresh_clones_then_fetches() {
        let tmp = TempDir::new().unwrap();
        let origin = setup_origin(&tmp, "svelte");
        let resource = resource_for(&origin, "svelte");
        let cache = RepoCache::new(tmp.path().join("repos"));

        cache.ensure_fresh(&resource, true).await.unwrap();
        let entry = cache.repo_path("svelte");
        assert!(entry.join(".git").exists());

        // New upstream commit is visible after the second ensure_fresh.
        std::fs::write(origin.join("more.txt"), "x").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "-m", "more"]);

        cache.ensure_fresh(&resource, true).await.unwrap();
        let head = crate::domains::git::run_git(&["rev-parse", "origin/main"], Some(&entry))
            .await
            .unwrap();
        let upstream = crate::domains::git::run_git(&["rev-parse", "main"], Some(&origin))
            .await
            .unwrap();
        assert_eq!(head, upstream);
    }

    #[tokio::test]
    async fn clone_failure_removes_partial_directory() {
        let tmp = TempDir::new().unwrap();
        let resource = Resource {
            name: "ghost".to_string(),
            origin: tmp
                .path()
                .join("does-not-exist")
                .to_string_lossy()
                .to_string(),
            branch: "main".to_string(),
            notes: None,
            subpath: None,
        };
        let cache = RepoCache::new(tmp.path().join("repos"));

        let err = cache.ensure_fresh(&resource, true).await.unwrap_err();
        assert!(matches!(err, HostError::NetworkError { .. }));
        assert!(!cache.repo_path("ghost").exists());
    }

    #[tokio::test]
    async fn origin_mismatch_is_repo_corrupt() {
        let tmp = TempDir::new().unwrap();
        let origin = setup_origin(&tmp, "svelte");
        let resource = resource_for(&origin, "svelte");
        let cache = RepoCache::new(tmp.path().join("repos"));
        cache.ensure_fresh(&resource, true).await.unwrap();

        let mut moved = resource.clone();
        moved.origin = "https://git.example.com/somewhere/else.git".to_string();
        let err = cache.ensure_fresh(&moved, true).await.unwrap_err();
        match err {
            HostError::RepoCorrupt { name, message } => {
                assert_eq!(name, "svelte");
                assert!(message.contains("registered as"));
            }
            other => panic!("expected RepoCorrupt, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_repo_directory_is_repo_corrupt() {
        let tmp = TempDir::new().unwrap();
        let origin = setup_origin(&tmp, "svelte");
        let resource = resource_for(&origin, "svelte");
        let cache = RepoCache::new(tmp.path().join("repos"));

        std::fs::create_dir_all(cache.repo_path("svelte")).unwrap();
        let err = cache.ensure_fresh(&resource, true).await.unwrap_err();
        assert!(matches!(err, HostError::RepoCorrupt { .. }));
    }

    #[tokio::test]
    async fn different_names_fetch_in_parallel() {
        let tmp = TempDir::new().unwrap();
        let origin_a = setup_origin(&tmp, "alpha");
        let origin_b = setup_origin(&tmp, "beta");
        let cache = Arc::new(RepoCache::new(tmp.path().join("repos")));

        let a = resource_for(&origin_a, "alpha");
        let b = resource_for(&origin_b, "beta");
        let (ra, rb) = tokio::join!(cache.ensure_fresh(&a, true), cache.ensure_fresh(&b, true));
        ra.unwrap();
        rb.unwrap();
        assert!(cache.repo_path("alpha").exists());
        assert!(cache.repo_path("beta").exists());
    }

    #[tokio::test]
    async fn same_name_callers_serialise() {
        let tmp = TempDir::new().unwrap();
        let origin = setup_origin(&tmp, "alpha");
        let cache = Arc::new(RepoCache::new(tmp.path().join("repos")));
        let resource = resource_for(&origin, "alpha");

        // Both calls race the initial clone; serialisation means exactly one
        // clones and the other fetches, and both succeed.
        let c1 = cache.clone();
        let r1 = resource.clone();
        let t1 = tokio::spawn(async move { c1.ensure_fresh(&r1, true).await });
        let c2 = cache.clone();
        let r2 = resource.clone();
        let t2 = tokio::spawn(async move { c2.ensure_fresh(&r2, true).await });

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
        assert!(cache.repo_path("alpha").join(".git").exists());
    }
}
