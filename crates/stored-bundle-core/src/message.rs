//! Records exchanged with the storage service.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named command sent to the storage service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name as understood by the storage service.
    pub command: String,
    /// Positional inputs.
    pub inputs: Vec<Value>,
}

impl CommandRequest {
    /// Create a request from a command name and its inputs.
    #[must_use]
    pub fn new(command: impl Into<String>, inputs: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            inputs,
        }
    }
}

/// The storage service's answer to a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Untyped payload; callers validate its shape.
    pub out: Value,
}

impl CommandResponse {
    /// Wrap a payload.
    #[must_use]
    pub const fn new(out: Value) -> Self {
        Self { out }
    }

    /// An empty response, as returned by commands answering out of band.
    #[must_use]
    pub const fn empty() -> Self {
        Self { out: Value::Null }
    }
}

/// A stored record as republished on a replay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentMessage {
    /// Identifier assigned by the storage service; ascending in capture order.
    pub id: i64,
    /// Unix timestamp (ms) at which the record was captured.
    pub timestamp: i64,
    /// Raw payload.
    pub message_content: Bytes,
}

impl PersistentMessage {
    /// Create a record.
    #[must_use]
    pub fn new(id: i64, timestamp: i64, message_content: impl Into<Bytes>) -> Self {
        Self {
            id,
            timestamp,
            message_content: message_content.into(),
        }
    }
}

/// How long a channel keeps published records around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persistence {
    pub max_age: Duration,
}

impl Persistence {
    #[must_use]
    pub const fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_uses_camel_case_fields() {
        let msg = PersistentMessage::new(7, 1_000, b"hi".to_vec());
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["timestamp"], 1_000);
        assert!(json.get("messageContent").is_some());

        let parsed: PersistentMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_request_serialization() {
        let request = CommandRequest::new("size", vec![serde_json::json!({ "sessionId": 3 })]);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"command\":\"size\""));
        assert!(json.contains("sessionId"));
    }
}
