//! A single stored message.

use std::{
    convert::Infallible,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use stored_bundle_core::{Finishable, NoChildren, PersistentMessage, StoredItem};

const UNCOMMITTED: u8 = 0;
const COMMITTING: u8 = 1;
const COMMITTED: u8 = 2;

/// A stored message, owned by the batch it was retrieved into.
///
/// `finished` is the consumer's declaration; `committed` is only set once
/// the storage service accepted the inactive tag for this message.
#[derive(Debug)]
pub struct MessageItem {
    message: PersistentMessage,
    finished: AtomicBool,
    commit_state: AtomicU8,
}

impl MessageItem {
    pub(crate) const fn new(message: PersistentMessage) -> Self {
        Self {
            message,
            finished: AtomicBool::new(false),
            commit_state: AtomicU8::new(UNCOMMITTED),
        }
    }

    /// The underlying stored record.
    #[must_use]
    pub const fn message(&self) -> &PersistentMessage {
        &self.message
    }

    /// Identifier assigned by the storage service.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.message.id
    }

    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.commit_state.load(Ordering::Acquire) == COMMITTED
    }

    pub(crate) fn finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Reserve a finished, uncommitted item for a tag call.
    ///
    /// Fails if the item is unfinished, committed, or held by another commit.
    pub(crate) fn claim_for_commit(&self) -> bool {
        self.finished()
            && self
                .commit_state
                .compare_exchange(UNCOMMITTED, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Settle a claim made by [`claim_for_commit`](Self::claim_for_commit).
    pub(crate) fn settle_commit(&self, accepted: bool) {
        let next = if accepted { COMMITTED } else { UNCOMMITTED };
        self.commit_state.store(next, Ordering::Release);
    }
}

#[async_trait]
impl Finishable for MessageItem {
    type Child = NoChildren;
    type Error = Infallible;

    async fn mark_finished(&self) -> Result<(), Infallible> {
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    async fn is_finished(&self) -> Result<bool, Infallible> {
        Ok(self.finished())
    }
}

impl StoredItem for MessageItem {
    type Value = Bytes;

    fn timestamp(&self) -> i64 {
        self.message.timestamp
    }

    fn value(&self) -> Bytes {
        self.message.message_content.clone()
    }
}
