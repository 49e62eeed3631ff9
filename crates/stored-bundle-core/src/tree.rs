//! Finish-propagating tree contract shared by bundles, batches and items.

use std::{convert::Infallible, sync::Arc};

use async_trait::async_trait;

use crate::SessionId;

/// A node in a tree of consumable data.
///
/// A node is finished when it has no children or when every child is
/// finished. Marking a node finished marks every descendant finished; it
/// never touches siblings or ancestors, which re-evaluate on their own.
///
/// Leaves have no children, so they must override both
/// [`mark_finished`](Self::mark_finished) and
/// [`is_finished`](Self::is_finished) to keep real state. The defaults
/// would otherwise report a leaf as finished unconditionally.
#[async_trait]
pub trait Finishable: Send + Sync {
    /// Child node type. Leaves use [`NoChildren`].
    type Child: Finishable + 'static;

    /// Error raised while reaching the children.
    type Error: std::error::Error
        + Send
        + Sync
        + 'static
        + From<<Self::Child as Finishable>::Error>;

    /// Whether this node currently has any children.
    async fn has_children(&self) -> Result<bool, Self::Error> {
        Ok(!self.children().await?.is_empty())
    }

    /// Snapshot of the current children.
    async fn children(&self) -> Result<Vec<Arc<Self::Child>>, Self::Error> {
        Ok(Vec::new())
    }

    /// Mark this node and all of its descendants as finished.
    async fn mark_finished(&self) -> Result<(), Self::Error> {
        for child in self.children().await? {
            child.mark_finished().await?;
        }
        Ok(())
    }

    /// Whether this node contains no unfinished children.
    async fn is_finished(&self) -> Result<bool, Self::Error> {
        for child in self.children().await? {
            if !child.is_finished().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Child type of a leaf. It has no values, so a leaf can never hand one out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoChildren {}

#[async_trait]
impl Finishable for NoChildren {
    type Child = Self;
    type Error = Infallible;

    async fn mark_finished(&self) -> Result<(), Infallible> {
        match *self {}
    }

    async fn is_finished(&self) -> Result<bool, Infallible> {
        match *self {}
    }
}

/// A single stored record.
pub trait StoredItem: Finishable<Child = NoChildren> {
    /// Payload type.
    type Value;

    /// Unix timestamp (ms) at which the record was captured.
    fn timestamp(&self) -> i64;

    /// The stored payload.
    fn value(&self) -> Self::Value;
}

/// A group of stored records backed by one remote session.
#[async_trait]
pub trait StoredBatch: Finishable<Child: StoredItem> {
    /// Unique identifier of the batch.
    fn id(&self) -> SessionId;

    /// Push any pending finished markings to the storage side.
    async fn commit(&self) -> Result<(), Self::Error>;
}

/// The root of a stored stream.
#[async_trait]
pub trait StoredBundle: Finishable<Child: StoredBatch> {
    /// Type of values accepted by [`add_item`](Self::add_item).
    type Item: Send + 'static;

    /// Open a fresh batch and make it current.
    ///
    /// Returns `None` when the storage side cannot provide one.
    async fn new_batch(&self) -> Option<Arc<Self::Child>>;

    /// Add an item to the current batch.
    async fn add_item(&self, item: Self::Item) -> Result<(), Self::Error>;
}
