//! Domain event definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded event from the server's `/global/event` stream.
///
/// `payload` is the value of the envelope's `payload` field when present,
/// otherwise the whole decoded object. Events are not stored; each one is
/// handed to the consumer and dropped.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerEvent {
    /// Event type (`message.updated`, `session.idle`, ...), if the server sent one
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// The event body handed to consumers
    pub payload: Value,
}

impl ServerEvent {
    /// Build an event from a decoded wire object, unwrapping the `payload` envelope.
    ///
    /// The type is taken from the envelope first, then from the unwrapped payload.
    pub fn from_envelope(mut value: Value) -> Self {
        let envelope_kind = type_field(&value);

        let payload = match value.as_object_mut().and_then(|obj| obj.remove("payload")) {
            Some(inner) => inner,
            None => value,
        };

        let kind = envelope_kind.or_else(|| type_field(&payload));
        Self { kind, payload }
    }

    /// Event type, or `"unknown"`
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("unknown")
    }

    /// Session ID referenced by the event's properties, if any
    pub fn session_id(&self) -> Option<&str> {
        let props = self.payload.get("properties")?;
        props
            .get("sessionID")
            .or_else(|| props.get("info").and_then(|info| info.get("sessionID")))
            .or_else(|| props.get("part").and_then(|part| part.get("sessionID")))
            .and_then(Value::as_str)
    }
}

fn type_field(value: &Value) -> Option<String> {
    value.get("type").and_then(Value::as_str).map(str::to_string)
}

/// Server lifecycle notifications produced by the supervisor and its child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerProcessEvent {
    /// A line the server wrote to stdout
    Stdout(String),

    /// A line the server wrote to stderr
    Stderr(String),

    /// The owned server process exited
    Exited { code: Option<i32> },
}
