//! ComfyUI WebSocket message envelope.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. The relay forwards every message
//! to its caller, so [`StreamEvent`] keeps the payload as raw JSON and
//! only the few message kinds the relay acts on get typed views.

use serde::{Deserialize, Serialize};

/// `type` of the per-node progress message; with a null node it marks
/// the end of a prompt.
pub const EXECUTING: &str = "executing";

/// `type` of a node-output message.
pub const EXECUTED: &str = "executed";

/// `type` of an execution failure, also used for relay-generated errors.
pub const EXECUTION_ERROR: &str = "execution_error";

/// Synthetic error message for a job request without `client_id`.
pub const MISSING_CLIENT_ID_MESSAGE: &str = "client_id is required";

/// Synthetic error message for a stream that never reported completion.
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// A single message received from (or synthesized on behalf of) ComfyUI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Any other top-level keys, kept so the event round-trips unchanged.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Payload for `executing` messages.
///
/// `node` is `None` only when the backend sent an explicit `null`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default, deserialize_with = "explicit_null")]
    pub node: Option<Option<String>>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<serde_json::Value>::deserialize(deserializer).map(|value| match value {
        None | Some(serde_json::Value::Null) => Some(None),
        Some(serde_json::Value::String(node)) => Some(Some(node)),
        Some(other) => Some(Some(other.to_string())),
    })
}

impl StreamEvent {
    /// Build an event from its parts.
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            extra: serde_json::Map::new(),
        }
    }

    /// Relay-generated `execution_error` carrying only a message.
    pub fn execution_error(message: impl Into<String>) -> Self {
        Self::new(
            EXECUTION_ERROR,
            serde_json::json!({ "exception_message": message.into() }),
        )
    }

    /// Typed view of an `executing` payload, if this is one.
    pub fn executing(&self) -> Option<ExecutingData> {
        if self.kind != EXECUTING {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Whether this event marks the end of execution for `prompt_id`.
    ///
    /// True only for an `executing` message whose `node` is JSON `null`
    /// and whose `prompt_id` equals the one returned at submission.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        match self.executing() {
            Some(ExecutingData {
                node: Some(None),
                prompt_id: Some(ref id),
            }) => id == prompt_id,
            _ => false,
        }
    }

    /// Convert into the JSON value handed to the invoking framework.
    pub fn into_value(self) -> serde_json::Value {
        let mut object = self.extra;
        object.insert("type".to_string(), serde_json::Value::String(self.kind));
        object.insert("data".to_string(), self.data);
        serde_json::Value::Object(object)
    }
}

/// Parse a ComfyUI WebSocket text frame.
///
/// Returns `Err` for malformed JSON or a message without a `type`.
/// Unknown types are accepted and passed through untouched.
pub fn parse_message(text: &str) -> Result<StreamEvent, serde_json::Error> {
    serde_json::from_str(text)
}
