use super::events::AgentEvent;
use crate::errors::HostError;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Provider listing as advertised by the backend, consumed read-only.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProviderList {
    #[serde(default, alias = "providers")]
    pub all: Vec<ProviderInfo>,
    #[serde(default)]
    pub connected: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderInfo {
    pub id: String,
    #[serde(default)]
    pub models: HashMap<String, Value>,
}

impl ProviderInfo {
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// A live subscription to the backend's global event stream. Dropping it
/// releases the connection.
pub struct EventSubscription {
    pub events: mpsc::Receiver<AgentEvent>,
    pub(crate) reader: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// HTTP client for the agent boundary. The orchestrator talks to the
/// backend through exactly these calls.
#[derive(Debug, Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn create_session(&self) -> Result<String, HostError> {
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&json!({}))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| HostError::SessionStartFailed {
                message: format!("session create request failed: {e}"),
            })?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| HostError::SessionStartFailed {
                message: format!("session create returned malformed JSON: {e}"),
            })?;

        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HostError::SessionStartFailed {
                message: "session create response carried no id".to_string(),
            })
    }

    /// Submit a prompt into an existing session. The answer arrives on the
    /// event stream, not in this response.
    pub async fn prompt(
        &self,
        session_id: &str,
        provider: &str,
        model: &str,
        text: &str,
    ) -> Result<(), HostError> {
        let body = json!({
            "model": { "providerID": provider, "modelID": model },
            "parts": [{ "type": "text", "text": text }],
        });

        self.http
            .post(format!("{}/session/{session_id}/message", self.base_url))
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| HostError::network("session.prompt", e))?;
        Ok(())
    }

    pub async fn list_providers(&self) -> Result<ProviderList, HostError> {
        let response = self
            .http
            .get(format!("{}/config/providers", self.base_url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| HostError::network("provider.list", e))?;

        response
            .json()
            .await
            .map_err(|e| HostError::network("provider.list", e))
    }

    /// Open the SSE event stream and forward each `data:` frame as an
    /// `AgentEvent`, in arrival order. Malformed frames are logged and
    /// skipped; the channel closes when the connection does.
    pub async fn subscribe(&self) -> Result<EventSubscription, HostError> {
        let response = self
            .http
            .get(format!("{}/event", self.base_url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| HostError::network("event.subscribe", e))?;

        let (tx, rx) = mpsc::channel(256);
        let reader = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            'read: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        log::warn!("Event stream read failed: {err}");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<AgentEvent>(payload) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break 'read;
                            }
                        }
                        Err(err) => {
                            log::warn!("Skipping malformed event frame: {err}");
                        }
                    }
                }
            }
        });

        Ok(EventSubscription { events: rx, reader })
    }
}
