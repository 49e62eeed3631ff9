//! A batch of messages backed by one storage session.

use std::{
    convert::Infallible,
    sync::{Arc, PoisonError, RwLock},
};

use async_trait::async_trait;
use stored_bundle_client::{StorageClient, client::INACTIVE_TAG};
use stored_bundle_core::{Finishable, SessionId, StoredBatch};
use tracing::{Instrument, Span};

use crate::MessageItem;

type Items = Arc<[Arc<MessageItem>]>;

/// Messages of one storage session.
///
/// The message list is fetched on first use and cached; `None` means the
/// batch has not synced yet. A failed fetch leaves it unsynced and reads
/// see an empty batch until a later fetch succeeds.
pub struct MessageBatch {
    session_id: SessionId,
    storage: StorageClient,
    items: RwLock<Option<Items>>,
    span: Span,
}

impl MessageBatch {
    /// Create a batch for an existing session.
    #[must_use]
    pub fn new(storage: StorageClient, session_id: SessionId) -> Self {
        let span = tracing::info_span!("batch", session_id);
        Self::with_span(storage, session_id, span)
    }

    pub(crate) fn child_of(storage: StorageClient, session_id: SessionId, parent: &Span) -> Self {
        let span = tracing::info_span!(parent: parent, "batch", session_id);
        Self::with_span(storage, session_id, span)
    }

    const fn with_span(storage: StorageClient, session_id: SessionId, span: Span) -> Self {
        Self {
            session_id,
            storage,
            items: RwLock::new(None),
            span,
        }
    }

    /// Whether the message list has been fetched.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.cached().is_some()
    }

    fn cached(&self) -> Option<Items> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn sync(&self) -> Items {
        if let Some(items) = self.cached() {
            return items;
        }

        let wait = self.storage.config().max_retrieval_wait;
        let retrieved = self
            .storage
            .retrieve_messages(self.session_id, wait)
            .instrument(self.span.clone())
            .await;

        match retrieved {
            Ok(messages) => {
                let fresh: Items = messages
                    .into_iter()
                    .map(|m| Arc::new(MessageItem::new(m)))
                    .collect();
                tracing::debug!(parent: &self.span, count = fresh.len(), "Synced batch");

                // Keep whichever list was published first so flags set on it survive.
                let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
                Arc::clone(items.get_or_insert(fresh))
            }
            Err(e) => {
                tracing::error!(parent: &self.span, error = %e, "Cannot proceed without retrieved batch messages");
                Vec::new().into()
            }
        }
    }
}

/// Items reserved for one tag call; settled when dropped.
struct CommitClaim {
    items: Vec<Arc<MessageItem>>,
    accepted: bool,
}

impl Drop for CommitClaim {
    fn drop(&mut self) {
        for item in &self.items {
            item.settle_commit(self.accepted);
        }
    }
}

#[async_trait]
impl Finishable for MessageBatch {
    type Child = MessageItem;
    type Error = Infallible;

    async fn has_children(&self) -> Result<bool, Infallible> {
        Ok(!self.sync().await.is_empty())
    }

    async fn children(&self) -> Result<Vec<Arc<MessageItem>>, Infallible> {
        Ok(self.sync().await.to_vec())
    }

    async fn mark_finished(&self) -> Result<(), Infallible> {
        if self.is_finished().await? {
            return Ok(());
        }
        for item in self.sync().await.iter() {
            item.mark_finished().await?;
        }
        self.commit().await
    }

    async fn is_finished(&self) -> Result<bool, Infallible> {
        Ok(self
            .sync()
            .await
            .iter()
            .all(|item| item.finished() && item.is_committed()))
    }
}

#[async_trait]
impl StoredBatch for MessageBatch {
    fn id(&self) -> SessionId {
        self.session_id
    }

    async fn commit(&self) -> Result<(), Infallible> {
        let mut claim = CommitClaim {
            items: self
                .sync()
                .await
                .iter()
                .filter(|item| item.claim_for_commit())
                .cloned()
                .collect(),
            accepted: false,
        };
        if claim.items.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = claim.items.iter().map(|item| item.id()).collect();
        match self
            .storage
            .tag(&ids, &[INACTIVE_TAG])
            .instrument(self.span.clone())
            .await
        {
            Ok(tagged) => {
                tracing::debug!(parent: &self.span, ?ids, tagged, "Committed finished messages");
                claim.accepted = true;
            }
            Err(e) => {
                tracing::error!(parent: &self.span, ?ids, error = %e, "Failed to tag items as inactive");
            }
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;
    use stored_bundle_client::{Command, CommandMap};
    use stored_bundle_core::{Channels, RpcClient, StorageConfig};

    use super::*;
    use crate::MemoryStorage;
    use crate::testing::{Fault, faulty_client};

    const SESSION_ID: SessionId = 42;

    fn setup(messages: u8) -> (Arc<MemoryStorage>, MessageBatch, Vec<i64>) {
        let storage = Arc::new(MemoryStorage::new());
        storage.create_session(SESSION_ID, "ndn:/listen", SESSION_ID);
        let ids = (0..messages)
            .map(|n| storage.append(SESSION_ID, vec![n]).unwrap())
            .collect();
        let client = StorageClient::new(
            Arc::clone(&storage) as Arc<dyn RpcClient>,
            Arc::clone(&storage) as Arc<dyn Channels>,
            StorageConfig::default(),
        );
        (storage, MessageBatch::new(client, SESSION_ID), ids)
    }

    fn last_tagged_ids(storage: &MemoryStorage) -> serde_json::Value {
        storage
            .requests()
            .iter()
            .rev()
            .find(|r| r.command == "tag")
            .and_then(CommandMap::from_request)
            .and_then(|m| m.get("ids").cloned())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let (storage, batch, _) = setup(0);

        assert!(!batch.has_children().await.unwrap());
        assert!(batch.children().await.unwrap().is_empty());
        assert!(batch.is_finished().await.unwrap());
        assert_eq!(storage.count(Command::Size), 1);
        assert_eq!(storage.count(Command::Get), 0);
    }

    #[tokio::test]
    async fn test_session_id() {
        let (_, batch, _) = setup(0);
        assert_eq!(batch.id(), SESSION_ID);
    }

    #[tokio::test]
    async fn test_sync_happens_once() {
        let (storage, batch, ids) = setup(3);

        assert!(!batch.is_synced());
        let children = batch.children().await.unwrap();
        assert!(batch.is_synced());
        assert!(batch.has_children().await.unwrap());
        batch.is_finished().await.unwrap();

        let child_ids: Vec<i64> = children.iter().map(|c| c.id()).collect();
        assert_eq!(child_ids, ids);
        assert_eq!(storage.count(Command::Size), 1);
        assert_eq!(storage.count(Command::Get), 1);
    }

    #[tokio::test]
    async fn test_unfinished_with_children() {
        let (_, batch, _) = setup(2);
        assert!(!batch.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_finished_without_children() {
        let (storage, batch, _) = setup(0);

        batch.mark_finished().await.unwrap();

        assert_eq!(storage.count(Command::Tag), 0);
        assert!(batch.is_finished().await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_finished_tags_everything_once() {
        let (storage, batch, ids) = setup(2);

        batch.mark_finished().await.unwrap();

        assert_eq!(storage.count(Command::Tag), 1);
        assert_eq!(last_tagged_ids(&storage), json!(ids));
        assert!(ids.iter().all(|id| storage.has_tag(*id, INACTIVE_TAG)));
        assert!(batch.is_finished().await.unwrap());

        batch.mark_finished().await.unwrap();
        assert_eq!(storage.count(Command::Tag), 1);
    }

    #[tokio::test]
    async fn test_commit_without_finished_items_is_noop() {
        let (storage, batch, _) = setup(2);
        let expected = batch.is_finished().await.unwrap();

        tokio_test::assert_ok!(batch.commit().await);

        assert_eq!(storage.count(Command::Tag), 0);
        assert_eq!(batch.is_finished().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_commit_sends_only_finished_items() {
        let (storage, batch, ids) = setup(2);
        assert!(batch.has_children().await.unwrap());
        assert!(!batch.is_finished().await.unwrap());

        let children = batch.children().await.unwrap();
        children[0].mark_finished().await.unwrap();
        batch.commit().await.unwrap();

        assert_eq!(storage.count(Command::Tag), 1);
        assert_eq!(last_tagged_ids(&storage), json!([ids[0]]));
        assert!(children[0].is_committed());
        assert!(!children[1].is_committed());
        assert!(!batch.is_finished().await.unwrap());

        batch.commit().await.unwrap();
        assert_eq!(storage.count(Command::Tag), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_tag_once() {
        let (storage, batch, _) = setup(3);
        batch.children().await.unwrap()[1].mark_finished().await.unwrap();

        let (a, b) = tokio::join!(batch.commit(), batch.commit());
        a.unwrap();
        b.unwrap();

        assert_eq!(storage.count(Command::Tag), 1);
    }

    #[tokio::test]
    async fn test_failed_retrieval_leaves_batch_unsynced() {
        let (storage, batch, _) = setup(2);
        storage.set_offline(true);

        assert!(!batch.has_children().await.unwrap());
        assert!(!batch.is_synced());
        assert_eq!(storage.open_channels(), 0);

        storage.set_offline(false);
        assert!(batch.has_children().await.unwrap());
        assert!(batch.is_synced());
        assert_eq!(batch.children().await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_timeout_leaves_batch_unsynced() {
        let (storage, _, _) = setup(2);
        let hanging = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&hanging);
        let client = faulty_client(&storage, move |command, _| {
            (command == Command::Size && flag.load(Ordering::SeqCst)).then_some(Fault::Hang)
        });
        let batch = MessageBatch::new(client, SESSION_ID);

        assert!(!batch.has_children().await.unwrap());
        assert!(!batch.is_synced());
        assert_eq!(storage.count(Command::Get), 0);
        assert_eq!(storage.open_channels(), 0);

        hanging.store(false, Ordering::SeqCst);
        assert_eq!(batch.children().await.unwrap().len(), 2);
        assert!(batch.is_synced());
        assert_eq!(storage.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_failed_tag_is_retried_by_next_commit() {
        let (storage, batch, ids) = setup(1);
        let item = Arc::clone(&batch.children().await.unwrap()[0]);
        item.mark_finished().await.unwrap();

        storage.set_offline(true);
        batch.commit().await.unwrap();
        assert!(!item.is_committed());
        assert!(!batch.is_finished().await.unwrap());

        storage.set_offline(false);
        batch.commit().await.unwrap();
        assert!(item.is_committed());
        assert!(storage.has_tag(ids[0], INACTIVE_TAG));
        assert!(batch.is_finished().await.unwrap());
        assert_eq!(storage.count(Command::Tag), 2);
    }

    #[tokio::test]
    async fn test_items_ordered_by_id_despite_replay_order() {
        let (_, batch, ids) = setup(5);

        let children = batch.children().await.unwrap();

        let child_ids: Vec<i64> = children.iter().map(|c| c.id()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(child_ids, sorted);
        let payloads: Vec<u8> = children.iter().map(|c| c.message().message_content[0]).collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }
}
