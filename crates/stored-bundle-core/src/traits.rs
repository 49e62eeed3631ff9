//! Traits for the remote collaborators: RPC transport and publish/subscribe.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{CommandRequest, CommandResponse, PersistentMessage, Persistence};

/// Remote session identifier.
pub type SessionId = i64;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Call failed: {0}")]
    Failed(String),
}

/// Request/response transport to the storage service.
///
/// Correlation of a response to its request is the transport's concern;
/// the future returned by `call` resolves with the matching response.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Send a request and wait for its response.
    async fn call(&self, request: CommandRequest) -> Result<CommandResponse, TransportError>;
}

/// Channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Cannot open channel {address}: {reason}")]
    Lifetime { address: String, reason: String },
    #[error("Channel {0} is closed")]
    Closed(String),
    #[error("Channel I/O error: {0}")]
    Io(String),
}

/// Callback invoked for each record published on a channel.
pub trait OnPublish<T>: Send + Sync {
    fn on_publish(&self, record: T);
}

/// An open publish/subscribe channel.
#[async_trait]
pub trait Channel<T>: Send + Sync {
    /// Address this channel was opened on.
    fn address(&self) -> &str;

    /// Register a handler for records published from now on.
    async fn subscribe(&self, handler: Arc<dyn OnPublish<T>>) -> Result<(), ChannelError>;

    /// Publish a record to every subscriber.
    fn publish(&self, record: T) -> Result<(), ChannelError>;

    /// Release the channel. Further publishes fail; closing twice is a no-op.
    fn close(&self);
}

/// Factory for channels carrying stored records.
#[async_trait]
pub trait Channels: Send + Sync {
    /// Open a channel at `address`.
    async fn open_channel(
        &self,
        address: &str,
        persistence: Persistence,
    ) -> Result<Box<dyn Channel<PersistentMessage>>, ChannelError>;
}
