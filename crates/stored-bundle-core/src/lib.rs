//! Core abstractions for remotely stored message bundles.
//!
//! This crate provides the fundamental building blocks:
//! - `Finishable` - The finish-propagating tree contract
//! - `StoredItem`, `StoredBatch`, `StoredBundle` - The three stored tiers
//! - `RpcClient` and `Channels` - Remote collaborator traits
//! - `StorageConfig` - Timeouts and well-known addresses

pub mod config;
pub mod message;
pub mod traits;
pub mod tree;

pub use config::StorageConfig;
pub use message::{CommandRequest, CommandResponse, PersistentMessage, Persistence};
pub use traits::{Channel, ChannelError, Channels, OnPublish, RpcClient, SessionId, TransportError};
pub use tree::{Finishable, NoChildren, StoredBatch, StoredBundle, StoredItem};
