//! Connection management: sharded registry and per-connection engine.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `connection` | Per-connection engine: reader/writer tasks, send API, close-once teardown |
//! | `pending`    | Map from message id to the one-shot slot awaiting the peer's response |
//! | `handler`    | User-supplied callback invoked for each inbound frame and read error |
//! | `shard`      | In-memory bucket of connections with registration lifecycle |
//! | `manager`    | Fleet root: sharding by hashed identifier, counts, ordered shutdown |
//! | `fleet`      | Process-wide directory mapping channels to managers |
//!
//! Ownership runs manager → shard → connection; a connection holds only a
//! weak reference back to its shard, and external holders keep the device
//! identifier and look connections up through the manager.

pub mod connection;
pub mod fleet;
pub mod handler;
pub mod manager;
mod pending;
mod shard;

use std::collections::HashMap;

pub use connection::DeviceConnection;
pub use fleet::Fleet;
pub use handler::FrameHandler;
pub use manager::ConnectionManager;

/// Connection metadata: string keys to arbitrary scalar values, immutable
/// after creation.
pub type Metadata = HashMap<String, serde_json::Value>;
