use crate::domains::git::worktrees;
use crate::domains::query;
use crate::domains::repos::RepoCache;
use crate::domains::resources::{Resource, ResourceRegistry};
use crate::errors::HostError;
use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMember {
    pub name: String,
    pub relative_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A composite directory holding one detached worktree per repository in a
/// named set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub key: String,
    pub path: PathBuf,
    pub members: Vec<WorkspaceMember>,
}

/// Materialises and tears down workspaces under `<workspacesDir>`. The
/// engine is the sole writer of that tree; work on one key serialises on a
/// per-key lock.
pub struct WorkspaceEngine {
    workspaces_dir: PathBuf,
    registry: Arc<ResourceRegistry>,
    cache: Arc<RepoCache>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceEngine {
    pub fn new(
        workspaces_dir: impl Into<PathBuf>,
        registry: Arc<ResourceRegistry>,
        cache: Arc<RepoCache>,
    ) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
            registry,
            cache,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn workspaces_dir(&self) -> &Path {
        &self.workspaces_dir
    }

    pub fn workspace_path(&self, key: &str) -> PathBuf {
        self.workspaces_dir.join(key)
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Produce the workspace for a repository set, creating it if needed.
    /// An existing workspace with all member worktrees present is reused
    /// as-is; one missing a member is treated as corrupt and rebuilt.
    /// Creation is all-or-nothing: a mid-build failure removes everything
    /// this attempt created before surfacing.
    pub async fn ensure_workspace(
        &self,
        set: &[String],
        quiet: bool,
    ) -> Result<Workspace, HostError> {
        let names = query::merge([set]);
        let key = query::workspace_key(&names)?;

        let mut resources = Vec::with_capacity(names.len());
        for name in &names {
            resources.push(self.registry.get(name)?);
        }

        try_join_all(
            resources
                .iter()
                .map(|resource| self.cache.ensure_fresh(resource, quiet)),
        )
        .await?;

        let lock = self.lock_for(&key).await;
        let _guard = lock.lock().await;

        let path = self.workspace_path(&key);
        if path.exists() {
            if self.members_present(&path, &resources) {
                log::debug!("Reusing workspace '{key}'");
                return Ok(self.describe(&key, &path, &resources));
            }
            log::warn!("Workspace '{key}' is missing members; rebuilding");
            self.teardown(&key, &path).await?;
        }

        self.build(&key, &path, &resources).await?;
        Ok(self.describe(&key, &path, &resources))
    }

    /// Keys of all workspaces currently on disk, sorted.
    pub fn list_workspaces(&self) -> Result<Vec<String>, HostError> {
        if !self.workspaces_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.workspaces_dir)
            .map_err(|e| HostError::io("list workspaces", self.workspaces_dir.display(), e))?;

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                keys.push(name.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Remove a workspace and every worktree registration pointing at it.
    pub async fn clear(&self, key: &str) -> Result<(), HostError> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let path = self.workspace_path(key);
        if !path.exists() {
            return Err(HostError::WorkspaceMissing {
                key: key.to_string(),
            });
        }
        self.teardown(key, &path).await
    }

    pub async fn clear_all(&self) -> Result<(), HostError> {
        for key in self.list_workspaces()? {
            match self.clear(&key).await {
                Ok(()) => {}
                // Benign race with a concurrent clear of the same key.
                Err(HostError::WorkspaceMissing { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn members_present(&self, path: &Path, resources: &[Resource]) -> bool {
        resources.iter().all(|resource| {
            let member = path.join(&resource.name);
            member.is_dir() && member.join(".git").exists()
        })
    }

    fn describe(&self, key: &str, path: &Path, resources: &[Resource]) -> Workspace {
        Workspace {
            key: key.to_string(),
            path: path.to_path_buf(),
            members: resources
                .iter()
                .map(|resource| WorkspaceMember {
                    name: resource.name.clone(),
                    relative_path: resource.relative_path(),
                    notes: resource.notes.clone(),
                })
                .collect(),
        }
    }

    async fn build(
        &self,
        key: &str,
        path: &Path,
        resources: &[Resource],
    ) -> Result<(), HostError> {
        log::info!("Creating workspace '{key}'");
        std::fs::create_dir_all(path)
            .map_err(|e| HostError::io("create workspace", path.display(), e))?;

        let mut created: Vec<&Resource> = Vec::new();
        for resource in resources {
            let repo_path = self.cache.repo_path(&resource.name);
            let worktree_path = path.join(&resource.name);
            let reference = format!("origin/{}", resource.branch);

            match worktrees::add_worktree(&repo_path, &worktree_path, &reference).await {
                Ok(()) => created.push(resource),
                Err(err) => {
                    log::warn!(
                        "Worktree for '{}' failed ({err}); rolling back workspace '{key}'",
                        resource.name
                    );
                    for done in created {
                        let _ = worktrees::remove_worktree(
                            &self.cache.repo_path(&done.name),
                            &path.join(&done.name),
                        )
                        .await;
                    }
                    let _ = std::fs::remove_dir_all(path);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn teardown(&self, key: &str, path: &Path) -> Result<(), HostError> {
        for name in key.split('+').filter(|n| !n.is_empty()) {
            let repo_path = self.cache.repo_path(name);
            let worktree_path = path.join(name);
            if repo_path.exists() {
                if let Err(err) = worktrees::remove_worktree(&repo_path, &worktree_path).await {
                    log::debug!("Worktree removal for '{name}' in '{key}': {err}");
                }
            }
        }
        if path.exists() {
            std::fs::remove_dir_all(path)
                .map_err(|e| HostError::io("remove workspace", path.display(), e))?;
        }
        Ok(())
    }
}
