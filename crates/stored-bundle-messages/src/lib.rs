//! Remote-backed message bundles.
//!
//! Provides:
//! - `MessageBundle` - Sessions linked to one consumer, one batch each
//! - `MessageBatch` - Messages of one session, committed as inactive once finished
//! - `MessageItem` - A single stored message
//! - Storage implementations (memory)

pub mod batch;
pub mod bundle;
pub mod error;
pub mod item;
pub mod storage;

#[cfg(all(test, feature = "memory"))]
mod testing;

use std::sync::Arc;

pub use batch::MessageBatch;
pub use bundle::MessageBundle;
pub use error::BundleError;
pub use item::MessageItem;
#[cfg(feature = "memory")]
pub use storage::MemoryStorage;
use stored_bundle_client::StorageClient;
use stored_bundle_core::{Channels, RpcClient, StorageConfig};

/// Build an empty bundle that starts its first session for `listen_channel`.
#[must_use]
pub fn new_stored_bundle(
    rpc: Arc<dyn RpcClient>,
    channels: Arc<dyn Channels>,
    config: StorageConfig,
    listen_channel: impl Into<String>,
) -> MessageBundle {
    MessageBundle::new(StorageClient::new(rpc, channels, config), listen_channel)
}
