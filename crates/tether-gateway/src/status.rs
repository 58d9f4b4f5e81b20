//! Read-only connection status snapshots.
//!
//! A snapshot merges the live connection state held by the manager with
//! lifecycle history stored externally. The serialized form flattens
//! metadata keys at the top level and omits every zero or empty field; all
//! timestamps and durations are integer milliseconds.

use std::fmt;

use async_trait::async_trait;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use tether_core::time;

use crate::connections::{Fleet, Metadata};
use crate::errors::StatusError;

/// Maximum history records attached to a snapshot.
pub const HISTORY_LIMIT: usize = 100;

/// Boundary reference to a channel: the hash-id keys the manager directory,
/// the name is what operators see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    /// Opaque channel hash-id.
    pub hash_id: String,
    /// Human-readable channel name.
    pub name: String,
}

impl ChannelRef {
    /// Create a channel reference.
    #[must_use]
    pub fn new(hash_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            hash_id: hash_id.into(),
            name: name.into(),
        }
    }
}

/// External store of connection lifecycle activity.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Fetch connect/disconnect records for a device, newest first, at most
    /// `limit` entries.
    ///
    /// # Errors
    ///
    /// [`StatusError::History`] when the lookup fails.
    async fn connection_activities(
        &self,
        channel: &ChannelRef,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<ConnectionHistory>, StatusError>;
}

/// One stored lifecycle record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionHistory {
    /// Peer address at the time of the activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Request id of the handshake that produced the activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Activity tag, `connect` or `disconnect`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    /// Connection type at the time of the activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Activity time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Session duration in milliseconds, for disconnect records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// Whether the device currently holds a live connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Presence {
    /// A live connection exists.
    Online,
    /// No live connection.
    #[default]
    Offline,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Assembled status snapshot for one device.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStatus {
    /// Channel display name.
    pub channel_name: String,
    /// Online/offline.
    pub presence: Presence,
    /// Connection establishment time, milliseconds.
    pub connected_at: Option<i64>,
    /// Disconnect time, milliseconds, when known from history.
    pub disconnected_at: Option<i64>,
    /// Connection type tag.
    pub connection_type: Option<String>,
    /// Session duration so far, milliseconds.
    pub duration: Option<i64>,
    /// Last peer activity, milliseconds.
    pub last_pinged_at: Option<i64>,
    /// Device identifier.
    pub device_id: String,
    /// Connection metadata, flattened into the top level when serialized.
    pub metadata: Metadata,
    /// Lifecycle history, newest first.
    pub history: Vec<ConnectionHistory>,
}

impl ConnectionStatus {
    /// Render the snapshot, omitting empty fields and flattening metadata.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        if !self.channel_name.is_empty() {
            object.insert("channel_name".into(), json!(self.channel_name));
        }
        object.insert("status".into(), json!(self.presence.to_string()));
        if let Some(ms) = self.connected_at {
            object.insert("connected_at".into(), json!(ms));
        }
        if let Some(ms) = self.disconnected_at {
            object.insert("disconnected_at".into(), json!(ms));
        }
        if let Some(tag) = &self.connection_type {
            object.insert("connection_type".into(), json!(tag));
        }
        if let Some(ms) = self.duration {
            object.insert("duration".into(), json!(ms));
        }
        if let Some(ms) = self.last_pinged_at {
            object.insert("last_pinged_at".into(), json!(ms));
        }
        if !self.device_id.is_empty() {
            object.insert("device_id".into(), json!(self.device_id));
        }
        for (key, value) in &self.metadata {
            object.insert(key.clone(), value.clone());
        }
        if !self.history.is_empty() {
            object.insert("connection_history".into(), json!(self.history));
        }
        Value::Object(object)
    }
}

impl Serialize for ConnectionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Assemble the status snapshot for `(channel, device_id)`.
///
/// # Errors
///
/// [`StatusError::ChannelNotManaged`] when the fleet has no manager for the
/// channel, [`StatusError::HistoryUnavailable`] when history is requested
/// without a store, or the store's own failure.
pub async fn find_connection_status(
    fleet: &Fleet,
    channel: &ChannelRef,
    device_id: &str,
    with_history: bool,
    history: Option<&dyn HistoryStore>,
) -> Result<ConnectionStatus, StatusError> {
    let manager = fleet
        .find(&channel.hash_id)
        .ok_or_else(|| StatusError::ChannelNotManaged(channel.hash_id.clone()))?;

    let mut status = ConnectionStatus {
        channel_name: channel.name.clone(),
        device_id: device_id.to_owned(),
        ..ConnectionStatus::default()
    };

    if let Some(conn) = manager.find(device_id) {
        let connected_at = time::to_millis(conn.created_at());
        status.presence = Presence::Online;
        status.connected_at = Some(connected_at);
        status.last_pinged_at = Some(conn.last_pinged_at_ms());
        status.connection_type = Some(conn.connection_type().to_owned());
        status.metadata = conn.metadata().clone();
        status.duration = Some((time::now_millis() - connected_at).max(0));
    }

    if with_history {
        let store = history.ok_or(StatusError::HistoryUnavailable)?;
        status.history = store
            .connection_activities(channel, device_id, HISTORY_LIMIT)
            .await?;
    }

    Ok(status)
}
