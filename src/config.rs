use crate::domains::resources::Resource;
use crate::errors::HostError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// All config writes in this process funnel through one lock so concurrent
// mutations never interleave their read-modify-write cycles.
static CONFIG_WRITE_LOCK: Mutex<()> = Mutex::new(());

const CONFIG_FILE: &str = "config.json";

fn default_agent_command() -> String {
    "opencode".to_string()
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_base_port() -> u16 {
    4096
}

fn default_port_attempts() -> u16 {
    30
}

fn default_ready_timeout_secs() -> u64 {
    15
}

/// Backend launch settings: which binary to run, how to reach it, and which
/// (provider, model) every session is pinned to.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_attempts")]
    pub port_attempts: u16,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: Vec::new(),
            provider: default_provider(),
            model: default_model(),
            base_port: default_base_port(),
            port_attempts: default_port_attempts(),
            ready_timeout_secs: default_ready_timeout_secs(),
        }
    }
}

/// The single JSON document under `<configRoot>/config.json`.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces_dir: Option<PathBuf>,
}

impl HostConfig {
    pub fn repos_dir(&self, root: &Path) -> PathBuf {
        self.repos_dir
            .clone()
            .unwrap_or_else(|| root.join("repos"))
    }

    pub fn workspaces_dir(&self, root: &Path) -> PathBuf {
        self.workspaces_dir
            .clone()
            .unwrap_or_else(|| root.join("workspaces"))
    }
}

/// Loader/saver for the config document. Reads are plain; writes are atomic
/// (temp file + rename) and serialised process-wide.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolution order: `ASKWERK_CONFIG_DIR`, then the platform config
    /// directory, then a dot directory under the working directory.
    pub fn default_root() -> PathBuf {
        if let Ok(dir) = std::env::var("ASKWERK_CONFIG_DIR")
            && !dir.is_empty()
        {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .map(|dir| dir.join("askwerk"))
            .unwrap_or_else(|| PathBuf::from(".askwerk"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn load(&self) -> Result<HostConfig, HostError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(HostConfig::default());
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| HostError::io("read config", path.display(), e))?;
        serde_json::from_str(&raw).map_err(HostError::config)
    }

    pub fn save(&self, config: &HostConfig) -> Result<(), HostError> {
        let _guard = CONFIG_WRITE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        std::fs::create_dir_all(&self.root)
            .map_err(|e| HostError::io("create config dir", self.root.display(), e))?;

        let rendered = serde_json::to_string_pretty(config).map_err(HostError::config)?;
        let path = self.config_path();
        let tmp = self.root.join(format!("{CONFIG_FILE}.tmp"));
        std::fs::write(&tmp, rendered)
            .map_err(|e| HostError::io("write config", tmp.display(), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| HostError::io("replace config", path.display(), e))?;
        Ok(())
    }
}
