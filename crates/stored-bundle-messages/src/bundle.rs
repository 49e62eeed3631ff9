//! The root of a remotely stored message stream.

use std::{
    collections::HashSet,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use bytes::Bytes;
use stored_bundle_client::{StorageClient, StorageClientError};
use stored_bundle_core::{Finishable, SessionId, StoredBatch, StoredBundle};
use tracing::{Instrument, Span};

use crate::{BundleError, MessageBatch};

#[derive(Default)]
struct BundleState {
    current: Option<Arc<MessageBatch>>,
    batches: Vec<Arc<MessageBatch>>,
    synced: bool,
}

impl BundleState {
    fn is_current(&self, batch: &MessageBatch) -> bool {
        self.current.as_ref().is_some_and(|c| c.id() == batch.id())
    }
}

/// Messages stored for one consumer, grouped into one batch per session.
///
/// The batch list mirrors the sessions the storage service links to the
/// current session. It is fetched lazily, refetched after the current batch
/// changes, and finished batches other than the current one are dropped
/// whenever the list is read.
pub struct MessageBundle {
    storage: StorageClient,
    listen_channel: String,
    state: RwLock<BundleState>,
    span: Span,
}

impl MessageBundle {
    /// Create a bundle whose first batch records `listen_channel`.
    #[must_use]
    pub fn new(storage: StorageClient, listen_channel: impl Into<String>) -> Self {
        let listen_channel = listen_channel.into();
        let span = tracing::info_span!("bundle", listen_channel = %listen_channel);
        Self {
            storage,
            listen_channel,
            state: RwLock::new(BundleState::default()),
            span,
        }
    }

    /// Resume a bundle whose current batch is `session_id`.
    #[must_use]
    pub fn with_session(storage: StorageClient, session_id: SessionId) -> Self {
        let bundle = Self::new(storage, String::new());
        let batch = MessageBatch::child_of(bundle.storage.clone(), session_id, &bundle.span);
        bundle.set_current(Arc::new(batch));
        bundle
    }

    /// Channel recorded by batches this bundle starts.
    #[must_use]
    pub fn listen_channel(&self) -> &str {
        &self.listen_channel
    }

    /// The batch currently accumulating messages.
    #[must_use]
    pub fn current_batch(&self) -> Option<Arc<MessageBatch>> {
        self.state().current.clone()
    }

    fn state(&self) -> RwLockReadGuard<'_, BundleState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, BundleState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, batch: Arc<MessageBatch>) {
        let mut state = self.state_mut();
        state.current = Some(batch);
        state.synced = false;
    }

    async fn next_session_id(&self) -> Result<SessionId, StorageClientError> {
        match self.current_batch() {
            None => self.storage.start_session(&self.listen_channel).await,
            Some(current) => self.storage.rename_session(current.id()).await,
        }
    }

    async fn sync(&self) -> Result<Vec<Arc<MessageBatch>>, BundleError> {
        let (stale, current) = {
            let state = self.state();
            // The first sync may legitimately find nothing, so an empty list is always rechecked.
            (!state.synced || state.batches.is_empty(), state.current.clone())
        };
        if stale {
            self.reconcile(current)
                .instrument(self.span.clone())
                .await
                .inspect_err(|e| {
                    tracing::error!(parent: &self.span, error = %e, "Cannot proceed without retrieved batch ids");
                })?;
        }

        self.prune().await;
        Ok(self.state().batches.clone())
    }

    /// Add a batch for every related session not cached yet.
    async fn reconcile(&self, current: Option<Arc<MessageBatch>>) -> Result<(), StorageClientError> {
        let Some(current) = current else {
            self.state_mut().synced = true;
            return Ok(());
        };

        let related = self.storage.query_by_session_id(current.id()).await?;

        let mut state = self.state_mut();
        let mut known: HashSet<SessionId> = state.batches.iter().map(|b| b.id()).collect();
        let mut added = Vec::new();
        for id in related.into_iter().flatten() {
            if !known.insert(id) {
                continue;
            }
            let batch = if id == current.id() {
                Arc::clone(&current)
            } else {
                Arc::new(MessageBatch::child_of(self.storage.clone(), id, &self.span))
            };
            state.batches.push(batch);
            added.push(id);
        }

        // A rotation during the query already invalidated this result.
        if state.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &current)) {
            state.synced = true;
        }
        tracing::debug!(parent: &self.span, session_id = current.id(), ?added, "Reconciled related sessions");
        Ok(())
    }

    /// Drop finished batches, keeping the current one regardless.
    ///
    /// A batch whose retrieval fails reads as empty and therefore finished,
    /// so it is dropped here with its messages unseen and still active
    /// remotely.
    async fn prune(&self) {
        let candidates: Vec<Arc<MessageBatch>> = {
            let state = self.state();
            state
                .batches
                .iter()
                .filter(|b| !state.is_current(b))
                .cloned()
                .collect()
        };

        let mut finished = HashSet::new();
        for batch in candidates {
            let Ok(done) = batch.is_finished().await;
            if done {
                finished.insert(batch.id());
            }
        }
        if finished.is_empty() {
            return;
        }

        let mut state = self.state_mut();
        let before = state.batches.len();
        let current = state.current.as_ref().map(|c| c.id());
        state
            .batches
            .retain(|b| Some(b.id()) == current || !finished.contains(&b.id()));
        tracing::debug!(
            parent: &self.span,
            pruned = before - state.batches.len(),
            "Dropped finished batches"
        );
    }
}

#[async_trait]
impl Finishable for MessageBundle {
    type Child = MessageBatch;
    type Error = BundleError;

    async fn has_children(&self) -> Result<bool, BundleError> {
        Ok(!self.sync().await?.is_empty())
    }

    async fn children(&self) -> Result<Vec<Arc<MessageBatch>>, BundleError> {
        self.sync().await
    }
}

#[async_trait]
impl StoredBundle for MessageBundle {
    type Item = Bytes;

    async fn new_batch(&self) -> Option<Arc<MessageBatch>> {
        match self.next_session_id().instrument(self.span.clone()).await {
            Ok(id) => {
                let batch = Arc::new(MessageBatch::child_of(self.storage.clone(), id, &self.span));
                self.set_current(Arc::clone(&batch));
                tracing::info!(parent: &self.span, session_id = id, "Opened new batch");
                Some(batch)
            }
            Err(e) => {
                tracing::error!(parent: &self.span, error = %e, "Unable to create new session");
                None
            }
        }
    }

    // TODO: write through to the current session once the storage service exposes an append command.
    async fn add_item(&self, _item: Bytes) -> Result<(), BundleError> {
        Err(BundleError::Unsupported("add_item"))
    }
}
