use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Frames pushed by the agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted.
    ConnectionEstablished { session_id: String },
    /// A new agent turn begins.
    ResponseStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    /// Incremental fragment of the current turn.
    Token { content: String },
    /// The current turn finished.
    ResponseComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
    /// Usage limit reached; the turn will not stream.
    QuotaExceeded { message: String },
    Error {
        message: String,
        #[serde(default)]
        fatal: bool,
    },
}

impl ServerMessage {
    /// Whether this message ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Error { fatal: true, .. })
    }
}

/// Frames sent to the agent service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A user turn.
    Message { content: String },
    /// Cancel the in-flight response.
    Abort,
}

impl ClientMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Parses one text frame. Malformed frames and unknown message types are
/// logged and skipped.
pub fn parse_server_message(payload: &str) -> Option<ServerMessage> {
    let parsed: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => {
            debug!("failed to parse server message: {err}, data: {payload}");
            return None;
        }
    };

    let Some(message_type) = parsed.get("type").and_then(Value::as_str) else {
        debug!("received server message without type field: {payload}");
        return None;
    };
    let message_type = message_type.to_string();

    match serde_json::from_value::<ServerMessage>(parsed) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!("skipping server message of type {message_type}: {err}, data: {payload}");
            None
        }
    }
}
