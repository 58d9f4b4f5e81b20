//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a connection manager, consumed at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Number of shards partitioning the connection map. Must be positive.
    pub n_shards: usize,
    /// Per-shard map capacity hint.
    pub init_shard_size: usize,
    /// Writer-inbox capacity per connection (the backpressure point).
    pub request_queue_size: usize,
    /// Registry adapter selection.
    pub registry: RegistryKind,
    /// Per-connection deadlines.
    pub timeouts: TimeoutConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            n_shards: 16,
            init_shard_size: 64,
            request_queue_size: 256,
            registry: RegistryKind::Memory,
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Built-in registry adapters; custom adapters are passed to
/// [`ConnectionManager::with_registry`].
///
/// [`ConnectionManager::with_registry`]: crate::ConnectionManager::with_registry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    /// In-memory registry; satisfies the contract trivially.
    #[default]
    Memory,
}

/// Per-connection deadlines, in milliseconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for each transport read; refreshed on every successful read
    /// and on each peer ping.
    pub read_ms: u64,
    /// Deadline for each outbound transport write.
    pub write_ms: u64,
    /// Deadline for enqueueing onto the writer inbox.
    pub request_ms: u64,
    /// Deadline for a synchronous request's matching response.
    pub response_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: 300_000,
            write_ms: 4_000,
            request_ms: 4_000,
            response_ms: 8_000,
        }
    }
}

impl TimeoutConfig {
    /// Read deadline.
    #[must_use]
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    /// Write deadline.
    #[must_use]
    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }

    /// Enqueue deadline.
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Response deadline.
    #[must_use]
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }
}
