use serde::Serialize;
use std::fmt;

/// Domain errors surfaced to callers. Every variant carries enough context
/// (names, available options) for a front end to render an actionable
/// message without re-querying.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", content = "data")]
pub enum HostError {
    EmptyResourceSet,
    InvalidResourceName {
        name: String,
    },
    UnknownResource {
        name: String,
    },
    DuplicateResource {
        name: String,
    },
    NetworkError {
        operation: String,
        message: String,
    },
    RepoCorrupt {
        name: String,
        message: String,
    },
    WorkspaceMissing {
        key: String,
    },
    PortsExhausted {
        base_port: u16,
        attempts: u16,
    },
    SessionStartFailed {
        message: String,
    },
    AgentError {
        name: String,
        message: String,
    },
    InvalidProvider {
        provider_id: String,
        available: Vec<String>,
    },
    ProviderNotConnected {
        provider_id: String,
        connected: Vec<String>,
    },
    InvalidModel {
        provider_id: String,
        model_id: String,
        available: Vec<String>,
    },
    GitOperationFailed {
        operation: String,
        message: String,
    },
    IoError {
        operation: String,
        path: String,
        message: String,
    },
    ConfigError {
        message: String,
    },
}

impl HostError {
    pub fn git(operation: &str, error: impl ToString) -> Self {
        HostError::GitOperationFailed {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn io(operation: &str, path: impl ToString, error: impl ToString) -> Self {
        HostError::IoError {
            operation: operation.to_string(),
            path: path.to_string(),
            message: error.to_string(),
        }
    }

    pub fn network(operation: &str, error: impl ToString) -> Self {
        HostError::NetworkError {
            operation: operation.to_string(),
            message: error.to_string(),
        }
    }

    pub fn config(error: impl ToString) -> Self {
        HostError::ConfigError {
            message: error.to_string(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyResourceSet => {
                write!(
                    f,
                    "No repositories selected; name at least one with @mentions or --repo"
                )
            }
            Self::InvalidResourceName { name } => {
                write!(
                    f,
                    "Invalid resource name '{name}': only lowercase letters, digits, '_' and '-' are allowed"
                )
            }
            Self::UnknownResource { name } => {
                write!(f, "Unknown resource '{name}'; register it with 'repo add'")
            }
            Self::DuplicateResource { name } => {
                write!(f, "Resource '{name}' already exists")
            }
            Self::NetworkError { operation, message } => {
                write!(f, "Network failure during '{operation}': {message}")
            }
            Self::RepoCorrupt { name, message } => {
                write!(
                    f,
                    "Cached clone for '{name}' does not match its registered origin ({message}); delete the cache entry and retry"
                )
            }
            Self::WorkspaceMissing { key } => {
                write!(f, "Workspace '{key}' does not exist")
            }
            Self::PortsExhausted {
                base_port,
                attempts,
            } => {
                write!(
                    f,
                    "No free agent port in {}..{}",
                    base_port,
                    (u32::from(*base_port) + u32::from(*attempts)).saturating_sub(1)
                )
            }
            Self::SessionStartFailed { message } => {
                write!(f, "Agent session failed to start: {message}")
            }
            Self::AgentError { name, message } => {
                write!(f, "Agent error '{name}': {message}")
            }
            Self::InvalidProvider {
                provider_id,
                available,
            } => {
                write!(
                    f,
                    "Unknown provider '{provider_id}'; available: {}",
                    available.join(", ")
                )
            }
            Self::ProviderNotConnected {
                provider_id,
                connected,
            } => {
                write!(
                    f,
                    "Provider '{provider_id}' is not connected; connected providers: {}",
                    connected.join(", ")
                )
            }
            Self::InvalidModel {
                provider_id,
                model_id,
                available,
            } => {
                write!(
                    f,
                    "Unknown model '{model_id}' for provider '{provider_id}'; available: {}",
                    available.join(", ")
                )
            }
            Self::GitOperationFailed { operation, message } => {
                write!(f, "Git operation '{operation}' failed: {message}")
            }
            Self::IoError {
                operation,
                path,
                message,
            } => {
                write!(f, "I/O error during '{operation}' on '{path}': {message}")
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {message}")
            }
        }
    }
}

impl std::error::Error for HostError {}

impl From<HostError> for String {
    fn from(error: HostError) -> Self {
        error.to_string()
    }
}
