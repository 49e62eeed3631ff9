//! Walk a stored bundle against the in-memory storage service.
//!
//! Run with: cargo run -p replay-demo
//!
//! Set `RUST_LOG=debug` to see every command and replay.

use std::sync::Arc;

use anyhow::Context;
use futures::future::try_join_all;
use stored_bundle_core::{Finishable, StorageConfig, StoredBatch, StoredBundle, StoredItem};
use stored_bundle_messages::{MemoryStorage, MessageBatch, new_stored_bundle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LISTEN_CHANNEL: &str = "ndn:/demo/sensor";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let storage = Arc::new(MemoryStorage::new());
    let bundle = new_stored_bundle(
        storage.clone(),
        storage.clone(),
        StorageConfig::default(),
        LISTEN_CHANNEL,
    );

    // Two sessions, as a listener would leave behind after one rotation.
    for readings in [["21.5", "21.7", "22.0"].as_slice(), ["22.4", "22.1"].as_slice()] {
        let batch = bundle
            .new_batch()
            .await
            .context("storage refused to open a session")?;
        for reading in readings {
            storage
                .append(batch.id(), reading.as_bytes().to_vec())
                .context("session vanished while recording")?;
        }
    }

    let batches = bundle.children().await?;
    tracing::info!(count = batches.len(), "Bundle holds batches");
    try_join_all(batches.iter().map(|batch| report(batch))).await?;

    if let Some(oldest) = batches.first() {
        oldest.mark_finished().await?;
        tracing::info!(session_id = oldest.id(), "Consumed oldest batch");
    }
    tracing::info!(
        remaining = bundle.children().await?.len(),
        "Finished batches are dropped, the current one stays"
    );

    bundle.mark_finished().await?;
    tracing::info!(finished = bundle.is_finished().await?, "Consumed everything");
    Ok(())
}

async fn report(batch: &MessageBatch) -> anyhow::Result<()> {
    for item in batch.children().await? {
        tracing::info!(
            session_id = batch.id(),
            message_id = item.id(),
            timestamp = item.timestamp(),
            value = %String::from_utf8_lossy(&item.value()),
            "Stored message"
        );
    }
    Ok(())
}
