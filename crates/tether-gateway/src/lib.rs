//! # tether-gateway
//!
//! Sharded manager for long-lived device connections over a framed,
//! bidirectional transport.
//!
//! - Per-connection engine: reader/writer tasks, synchronous
//!   request/response correlation with timeouts, ping-driven liveness,
//!   close-once teardown
//! - Sharded in-memory registry keyed by hashed device identifier
//! - Pluggable [`Registry`] adapter for external connection visibility
//! - [`Fleet`] directory mapping channels to managers
//! - Read-only connection status snapshots merging live state with
//!   externally stored history
//! - Graceful shutdown: manager → shards (concurrent) → connections →
//!   task join → registry

#![deny(unsafe_code)]

pub mod config;
pub mod connections;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod status;
pub mod transport;

pub use config::{GatewayConfig, RegistryKind, TimeoutConfig};
pub use connections::{ConnectionManager, DeviceConnection, Fleet, FrameHandler, Metadata};
pub use errors::{ConnectionError, ManagerError, RegistryError, StatusError, TransportError};
pub use registry::{MemoryRegistry, Registry};
pub use status::{ChannelRef, ConnectionHistory, ConnectionStatus, HistoryStore, Presence};
pub use tether_core::{Frame, FrameError, FrameKind};
