use crate::config::{ConfigStore, HostConfig};
use crate::errors::HostError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A named source of context: a git repository plus the branch we track.
/// Serialised field names follow the on-disk descriptor shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "url")]
    pub origin: String,
    pub branch: String,
    #[serde(
        rename = "specialNotes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<String>,
    #[serde(
        rename = "searchPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub subpath: Option<String>,
}

impl Resource {
    /// Path of the member inside a workspace: `name` or `name/subpath`.
    pub fn relative_path(&self) -> String {
        match &self.subpath {
            Some(subpath) => format!("{}/{}", self.name, subpath.trim_matches('/')),
            None => self.name.clone(),
        }
    }
}

pub fn is_valid_resource_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'))
}

/// Lookup and mutation of resource definitions. Loads the config document
/// once at construction; every mutation rewrites it through the store.
pub struct ResourceRegistry {
    store: ConfigStore,
    config: Mutex<HostConfig>,
}

impl ResourceRegistry {
    pub fn load(store: ConfigStore) -> Result<Self, HostError> {
        let config = store.load()?;
        Ok(Self {
            store,
            config: Mutex::new(config),
        })
    }

    /// All resources in insertion order.
    pub fn list(&self) -> Vec<Resource> {
        self.lock().resources.clone()
    }

    pub fn get(&self, name: &str) -> Result<Resource, HostError> {
        let wanted = name.to_lowercase();
        self.lock()
            .resources
            .iter()
            .find(|r| r.name == wanted)
            .cloned()
            .ok_or(HostError::UnknownResource {
                name: name.to_string(),
            })
    }

    pub fn add(&self, resource: Resource) -> Result<Resource, HostError> {
        if !is_valid_resource_name(&resource.name) {
            return Err(HostError::InvalidResourceName {
                name: resource.name,
            });
        }
        if resource.origin.trim().is_empty() || resource.origin.contains(char::is_whitespace) {
            return Err(HostError::config(format!(
                "origin '{}' does not look git-clonable",
                resource.origin
            )));
        }

        let mut config = self.lock();
        if config
            .resources
            .iter()
            .any(|r| r.name.eq_ignore_ascii_case(&resource.name))
        {
            return Err(HostError::DuplicateResource {
                name: resource.name,
            });
        }

        config.resources.push(resource.clone());
        self.store.save(&config)?;
        log::info!("Registered resource '{}'", resource.name);
        Ok(resource)
    }

    /// Remove a resource definition. The cached clone is left in place.
    pub fn remove(&self, name: &str) -> Result<(), HostError> {
        let wanted = name.to_lowercase();
        let mut config = self.lock();
        let before = config.resources.len();
        config.resources.retain(|r| r.name != wanted);
        if config.resources.len() == before {
            return Err(HostError::UnknownResource {
                name: name.to_string(),
            });
        }
        self.store.save(&config)?;
        log::info!("Removed resource '{wanted}'");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostConfig> {
        self.config
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
