//! Collection of records replayed on an ephemeral channel.

use std::{ops::Deref, sync::Arc, time::Duration};

use stored_bundle_core::{Channel, ChannelError, Channels, OnPublish, PersistentMessage, Persistence};
use thiserror::Error;
use tokio::sync::mpsc;

/// Upper bound on storage reserved up front; larger collections grow on demand.
const MAX_PREALLOCATED: usize = 1024;

/// Create a collector/wait pair expecting `expected` records.
///
/// The collector is handed to a channel; the wait is kept by the caller.
#[must_use]
pub fn collection<T: Send>(expected: usize) -> (MessageCollector<T>, CollectionWait<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MessageCollector { tx }, CollectionWait { expected, rx })
}

/// Publish handler forwarding every record to its [`CollectionWait`].
pub struct MessageCollector<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send> OnPublish<T> for MessageCollector<T> {
    fn on_publish(&self, record: T) {
        // The wait may already have resolved; late records are dropped.
        let _ = self.tx.send(record);
    }
}

/// The wait expired before every expected record arrived.
#[derive(Debug, Error)]
#[error("received {received} of {expected} records")]
pub struct WaitExpired {
    pub expected: usize,
    pub received: usize,
}

/// Receiving half of a collection.
pub struct CollectionWait<T> {
    expected: usize,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: Send> CollectionWait<T> {
    /// Wait until every expected record arrived or `limit` elapses.
    ///
    /// Records are returned in arrival order. Expecting zero records
    /// resolves immediately. If every collector is dropped early the wait
    /// fails without sitting out the limit.
    ///
    /// # Errors
    /// Returns [`WaitExpired`] if fewer records than expected arrived.
    pub async fn wait(self, limit: Duration) -> Result<Vec<T>, WaitExpired> {
        let Self { expected, mut rx } = self;
        let mut received = Vec::with_capacity(expected.min(MAX_PREALLOCATED));
        if expected == 0 {
            return Ok(received);
        }

        let completed = tokio::time::timeout(limit, async {
            while received.len() < expected {
                match rx.recv().await {
                    Some(record) => received.push(record),
                    None => return false,
                }
            }
            true
        })
        .await
        .unwrap_or(false);

        if completed {
            Ok(received)
        } else {
            Err(WaitExpired {
                expected,
                received: received.len(),
            })
        }
    }
}

/// A replay channel that is closed when dropped.
pub struct ScopedChannel {
    inner: Box<dyn Channel<PersistentMessage>>,
}

impl ScopedChannel {
    /// Open a channel owned by the returned guard.
    ///
    /// # Errors
    /// Returns error if the channel cannot be opened.
    pub async fn open(
        channels: &dyn Channels,
        address: &str,
        persistence: Persistence,
    ) -> Result<Self, ChannelError> {
        let inner = channels.open_channel(address, persistence).await?;
        tracing::debug!(address, "Opened replay channel");
        Ok(Self { inner })
    }

    /// Subscribe a handler.
    ///
    /// # Errors
    /// Returns error if the channel rejects the subscription.
    pub async fn subscribe(
        &self,
        handler: Arc<dyn OnPublish<PersistentMessage>>,
    ) -> Result<(), ChannelError> {
        self.inner.subscribe(handler).await
    }
}

impl Deref for ScopedChannel {
    type Target = dyn Channel<PersistentMessage>;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for ScopedChannel {
    fn drop(&mut self) {
        tracing::debug!(address = self.inner.address(), "Releasing replay channel");
        self.inner.close();
    }
}
