use serde::{Deserialize, Serialize};

/// Field in the job input that scopes the backend socket session.
pub const CLIENT_ID_FIELD: &str = "client_id";

/// A job as delivered by the invoking framework.
///
/// `input` is the job request and is forwarded to the backend verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Extract the correlation identifier from a job request.
///
/// Returns `None` when the field is absent or `null`. Non-string scalars are
/// rendered with their JSON representation.
pub fn client_id(request: &serde_json::Value) -> Option<String> {
    match request.get(CLIENT_ID_FIELD)? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
