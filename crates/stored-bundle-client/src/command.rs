//! Storage command names and input maps.

use std::{fmt, str::FromStr};

use serde_json::{Map, Value};
use stored_bundle_core::CommandRequest;
use thiserror::Error;

/// Input map keys understood by the storage service.
pub mod keys {
    pub const REPLAY_CHANNEL: &str = "replayChannel";
    pub const SESSION_ID: &str = "sessionId";
    pub const ONLY_WITH_ACTIVE_MESSAGES: &str = "onlyWithActiveMessages";
    pub const LISTEN_CHANNEL: &str = "listenChannel";
    pub const LIMIT: &str = "limit";
    pub const SKIP: &str = "skip";
    pub const QUERY_CHANNEL: &str = "queryChannel";
    pub const IDS: &str = "ids";
    pub const TAGS: &str = "tags";
}

/// Commands accepted by the storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    QueryByChannelName,
    QueryBySessionId,
    Rename,
    Size,
    Get,
    Start,
    Tag,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueryByChannelName => "queryByChannelName",
            Self::QueryBySessionId => "queryBySessionId",
            Self::Rename => "rename",
            Self::Size => "size",
            Self::Get => "get",
            Self::Start => "start",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command name not known to this client.
#[derive(Debug, Error)]
#[error("Unknown storage command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "queryByChannelName" => Self::QueryByChannelName,
            "queryBySessionId" => Self::QueryBySessionId,
            "rename" => Self::Rename,
            "size" => Self::Size,
            "get" => Self::Get,
            "start" => Self::Start,
            "tag" => Self::Tag,
            other => return Err(UnknownCommand(other.to_string())),
        })
    }
}

/// Keyed inputs of a single command.
///
/// Built once per call and moved into the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandMap {
    entries: Map<String, Value>,
}

impl CommandMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    #[must_use]
    pub fn entry(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }

    /// Get an entry by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Build the request carrying this map as its only input.
    #[must_use]
    pub fn into_request(self, command: Command) -> CommandRequest {
        CommandRequest::new(command.as_str(), vec![Value::Object(self.entries)])
    }

    /// Recover the map from a request built by [`into_request`](Self::into_request).
    #[must_use]
    pub fn from_request(request: &CommandRequest) -> Option<Self> {
        match request.inputs.first()? {
            Value::Object(entries) => Some(Self {
                entries: entries.clone(),
            }),
            _ => None,
        }
    }
}
