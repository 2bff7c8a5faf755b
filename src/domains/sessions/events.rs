use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MESSAGE_PART_UPDATED: &str = "message.part.updated";
pub const SESSION_IDLE: &str = "session.idle";
pub const SESSION_ERROR: &str = "session.error";

/// One tagged record from the backend's event stream. Payload shapes vary
/// per tag, so the properties stay a `Value` and typed access goes through
/// the accessors below; unknown tags pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Value,
}

impl AgentEvent {
    /// The session this event belongs to, if it carries one. Events without
    /// a session identity are informational and visible to every consumer.
    pub fn session_id(&self) -> Option<&str> {
        self.properties
            .get("sessionID")
            .and_then(Value::as_str)
            .or_else(|| {
                self.properties
                    .get("part")
                    .and_then(|part| part.get("sessionID"))
                    .and_then(Value::as_str)
            })
            .or_else(|| {
                self.properties
                    .get("info")
                    .and_then(|info| info.get("sessionID"))
                    .and_then(Value::as_str)
            })
    }

    pub fn part(&self) -> Option<&Value> {
        self.properties.get("part")
    }

    pub fn part_id(&self) -> Option<&str> {
        self.part()?.get("id").and_then(Value::as_str)
    }

    /// Text content, for `message.part.updated` events carrying a text part.
    pub fn part_text(&self) -> Option<&str> {
        let part = self.part()?;
        if part.get("type").and_then(Value::as_str) != Some("text") {
            return None;
        }
        part.get("text").and_then(Value::as_str)
    }

    pub fn error_name(&self) -> Option<&str> {
        self.properties
            .get("error")
            .and_then(|error| error.get("name"))
            .and_then(Value::as_str)
    }

    pub fn error_message(&self) -> Option<&str> {
        let error = self.properties.get("error")?;
        error
            .get("data")
            .and_then(|data| data.get("message"))
            .and_then(Value::as_str)
            .or_else(|| error.get("message").and_then(Value::as_str))
    }
}
