//! Storage service command client.

use std::{sync::Arc, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;
use stored_bundle_core::{
    ChannelError, Channels, PersistentMessage, Persistence, RpcClient, SessionId, StorageConfig,
    TransportError,
};
use uuid::Uuid;

use crate::collector::{ScopedChannel, collection};
use crate::command::{Command, CommandMap, keys};

/// Tag applied to messages that have been consumed.
pub const INACTIVE_TAG: &str = "inactive";

/// Storage client error.
#[derive(Debug, thiserror::Error)]
pub enum StorageClientError {
    #[error("Command {command} timed out after {timeout:?}")]
    CommandTimeout { command: Command, timeout: Duration },
    #[error("Command {command} failed: {source}")]
    Transport {
        command: Command,
        #[source]
        source: TransportError,
    },
    #[error("Response to {command} was not of the expected type {expected}: {reason}")]
    UnexpectedResponseType {
        command: Command,
        expected: &'static str,
        reason: String,
    },
    #[error("Retrieved {received} of {expected} messages for session {session_id} in time")]
    RetrievalTimeout {
        session_id: SessionId,
        expected: u64,
        received: usize,
    },
    #[error("Replay channel unavailable: {0}")]
    ChannelUnavailable(#[from] ChannelError),
}

impl StorageClientError {
    /// Whether the failure is a deadline expiring rather than a hard error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. } | Self::RetrievalTimeout { .. }
        )
    }
}

/// Client for the storage service's command set.
///
/// Cheap to clone; the transport and channel factory are shared.
#[derive(Clone)]
pub struct StorageClient {
    rpc: Arc<dyn RpcClient>,
    channels: Arc<dyn Channels>,
    config: StorageConfig,
}

impl StorageClient {
    /// Create a new client.
    ///
    /// `rpc` must already be bound to `config.command_channel`; the address
    /// is carried here so every command can be traced to its destination.
    #[must_use]
    pub fn new(rpc: Arc<dyn RpcClient>, channels: Arc<dyn Channels>, config: StorageConfig) -> Self {
        tracing::debug!(
            command_channel = %config.command_channel,
            retrieval_base = %config.retrieval_base,
            "Storage client ready"
        );
        Self {
            rpc,
            channels,
            config,
        }
    }

    /// Configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Execute a command and decode its response as `T`.
    ///
    /// The payload must already have the shape of `T`; no coercion between
    /// numbers, strings or lists is attempted.
    ///
    /// # Errors
    /// Returns error on timeout, transport failure or a mismatched response.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        command: Command,
        inputs: CommandMap,
    ) -> Result<T, StorageClientError> {
        let expected = std::any::type_name::<T>();
        tracing::info!(%command, channel = %self.config.command_channel, expected, "Executing remote command");

        let out = self.send(command, inputs).await?;
        serde_json::from_value(out).map_err(|e| StorageClientError::UnexpectedResponseType {
            command,
            expected,
            reason: e.to_string(),
        })
    }

    /// Execute a command whose answer arrives out of band.
    async fn execute_unchecked(
        &self,
        command: Command,
        inputs: CommandMap,
    ) -> Result<(), StorageClientError> {
        tracing::info!(%command, channel = %self.config.command_channel, "Executing remote command, ignoring response");
        self.send(command, inputs).await.map(drop)
    }

    async fn send(&self, command: Command, inputs: CommandMap) -> Result<Value, StorageClientError> {
        let timeout = self.config.call_timeout;
        let call = self.rpc.call(inputs.into_request(command));

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => Ok(response.out),
            Ok(Err(source)) => Err(StorageClientError::Transport { command, source }),
            Err(_) => Err(StorageClientError::CommandTimeout { command, timeout }),
        }
    }

    /// Start a session recording `listen_channel`.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn start_session(&self, listen_channel: &str) -> Result<SessionId, StorageClientError> {
        let map = CommandMap::new().entry(keys::LISTEN_CHANNEL, listen_channel);
        self.execute(Command::Start, map).await
    }

    /// Rename a session, returning its new identifier.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn rename_session(&self, session_id: SessionId) -> Result<SessionId, StorageClientError> {
        let map = CommandMap::new().entry(keys::SESSION_ID, session_id);
        self.execute(Command::Rename, map).await
    }

    /// Sessions recorded for a channel.
    ///
    /// This returns every session attached to the channel, including those of
    /// unrelated consumers of the same channel.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn query_by_channel_name(
        &self,
        channel: &str,
    ) -> Result<Vec<SessionId>, StorageClientError> {
        let map = CommandMap::new().entry(keys::QUERY_CHANNEL, channel);
        self.execute(Command::QueryByChannelName, map).await
    }

    /// Sessions linked to `session_id` that still hold active messages,
    /// grouped as the storage service reports them.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn query_by_session_id(
        &self,
        session_id: SessionId,
    ) -> Result<Vec<Vec<SessionId>>, StorageClientError> {
        let map = CommandMap::new()
            .entry(keys::SESSION_ID, session_id)
            .entry(keys::ONLY_WITH_ACTIVE_MESSAGES, true);
        self.execute(Command::QueryBySessionId, map).await
    }

    /// Tag messages, returning how many were tagged.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn tag(&self, message_ids: &[i64], tags: &[&str]) -> Result<u64, StorageClientError> {
        let map = CommandMap::new()
            .entry(keys::IDS, message_ids.to_vec())
            .entry(keys::TAGS, tags.to_vec());
        self.execute(Command::Tag, map).await
    }

    /// Number of messages currently in a session.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn size(&self, session_id: SessionId) -> Result<u64, StorageClientError> {
        let map = CommandMap::new().entry(keys::SESSION_ID, session_id);
        self.execute(Command::Size, map).await
    }

    /// Ask the storage service to replay a session onto `replay_channel`.
    ///
    /// # Errors
    /// Returns error if the storage service cannot be reached.
    pub async fn get(
        &self,
        session_id: SessionId,
        limit: u64,
        skip: u64,
        replay_channel: &str,
    ) -> Result<(), StorageClientError> {
        let map = CommandMap::new()
            .entry(keys::SESSION_ID, session_id)
            .entry(keys::LIMIT, limit)
            .entry(keys::SKIP, skip)
            .entry(keys::REPLAY_CHANNEL, replay_channel);
        self.execute_unchecked(Command::Get, map).await
    }

    /// Retrieve every message of a session, ordered by message id.
    ///
    /// The messages are replayed on a channel opened for this call only;
    /// the channel is closed on every return path.
    ///
    /// # Errors
    /// Returns error if a command fails, the replay channel cannot be used,
    /// or not every message arrives within `max_wait`.
    pub async fn retrieve_messages(
        &self,
        session_id: SessionId,
        max_wait: Duration,
    ) -> Result<Vec<PersistentMessage>, StorageClientError> {
        let count = self.size(session_id).await?;
        if count == 0 {
            tracing::debug!(session_id, "Session is empty, nothing to retrieve");
            return Ok(Vec::new());
        }

        let address = format!("{}/{session_id}/{}", self.config.retrieval_base, Uuid::new_v4());
        let persistence = Persistence::new(self.config.persistence_for(count));
        let channel = ScopedChannel::open(self.channels.as_ref(), &address, persistence).await?;

        let (collector, wait) = collection(usize::try_from(count).unwrap_or(usize::MAX));
        channel.subscribe(Arc::new(collector)).await?;

        self.get(session_id, count, 0, channel.address()).await?;

        let mut messages = wait.wait(max_wait).await.map_err(|e| {
            tracing::error!(session_id, expected = count, received = e.received, "Unable to retrieve messages");
            StorageClientError::RetrievalTimeout {
                session_id,
                expected: count,
                received: e.received,
            }
        })?;

        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }
}
