//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage command channel used when none is configured.
pub const DEFAULT_COMMAND_CHANNEL: &str = "ndn:/intel/storage/command";

/// Prefix under which per-retrieval replay channels are opened.
pub const DEFAULT_RETRIEVAL_BASE: &str = "ndn:/intel/bundle/retrieve";

/// Timeouts and well-known addresses for talking to the storage service.
///
/// Durations serialize as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    /// Address the storage service listens for commands on. The RPC
    /// transport is expected to be bound here; clients report it with
    /// every command.
    pub command_channel: String,

    /// Base address for replay channels.
    pub retrieval_base: String,

    /// Deadline for a single remote command.
    #[serde(with = "duration_ms")]
    pub call_timeout: Duration,

    /// How long a batch waits for all of its records to be replayed.
    #[serde(with = "duration_ms")]
    pub max_retrieval_wait: Duration,

    /// Replay channel persistence granted per expected record.
    #[serde(with = "duration_ms")]
    pub persistence_per_item: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            command_channel: DEFAULT_COMMAND_CHANNEL.to_string(),
            retrieval_base: DEFAULT_RETRIEVAL_BASE.to_string(),
            call_timeout: Duration::from_secs(10),
            max_retrieval_wait: Duration::from_secs(30),
            persistence_per_item: Duration::from_secs(5),
        }
    }
}

impl StorageConfig {
    /// Set the address commands are sent to.
    #[must_use]
    pub fn with_command_channel(mut self, channel: impl Into<String>) -> Self {
        self.command_channel = channel.into();
        self
    }

    /// Set the per-command deadline.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the replay wait used by batches.
    #[must_use]
    pub const fn with_max_retrieval_wait(mut self, wait: Duration) -> Self {
        self.max_retrieval_wait = wait;
        self
    }

    /// Set the base address for replay channels.
    #[must_use]
    pub fn with_retrieval_base(mut self, base: impl Into<String>) -> Self {
        self.retrieval_base = base.into();
        self
    }

    /// Persistence budget for a replay of `count` records.
    #[must_use]
    pub fn persistence_for(&self, count: u64) -> Duration {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.persistence_per_item.saturating_mul(count)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{ "callTimeout": 250, "retrievalBase": "ndn:/x" }"#).unwrap();

        assert_eq!(config.call_timeout, Duration::from_millis(250));
        assert_eq!(config.retrieval_base, "ndn:/x");
        assert_eq!(config.command_channel, DEFAULT_COMMAND_CHANNEL);
        assert_eq!(config.max_retrieval_wait, Duration::from_secs(30));
    }

    #[test]
    fn test_command_channel_override() {
        let config = StorageConfig::default().with_command_channel("ndn:/lab/storage");
        assert_eq!(config.command_channel, "ndn:/lab/storage");

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["commandChannel"], "ndn:/lab/storage");
    }

    #[test]
    fn test_persistence_scales_with_count() {
        let config = StorageConfig::default();
        assert_eq!(config.persistence_for(0), Duration::ZERO);
        assert_eq!(config.persistence_for(3), Duration::from_secs(15));
    }
}
