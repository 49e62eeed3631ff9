//! Command protocol client for the remote message storage service.
//!
//! Provides:
//! - Storage command names and input maps
//! - `StorageClient` - Timeout-bounded, type-checked remote commands
//! - Replay collection of a session's stored messages

pub mod client;
pub mod collector;
pub mod command;

#[cfg(test)]
mod testing;

pub use client::{StorageClient, StorageClientError};
pub use collector::{CollectionWait, MessageCollector, ScopedChannel};
pub use command::{Command, CommandMap};
