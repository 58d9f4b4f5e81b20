//! Process-wide directory of connection managers, keyed by channel.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::manager::ConnectionManager;

/// Directory mapping channel hash-ids to their connection managers.
///
/// Channels are opaque here; the directory neither creates nor owns manager
/// lifecycles beyond [`close_all`].
///
/// [`close_all`]: Fleet::close_all
#[derive(Default)]
pub struct Fleet {
    managers: RwLock<HashMap<String, Arc<ConnectionManager>>>,
}

impl Fleet {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a manager under a channel id, returning any displaced manager.
    pub fn attach(
        &self,
        channel_id: impl Into<String>,
        manager: Arc<ConnectionManager>,
    ) -> Option<Arc<ConnectionManager>> {
        self.managers.write().insert(channel_id.into(), manager)
    }

    /// Look up the manager for a channel.
    #[must_use]
    pub fn find(&self, channel_id: &str) -> Option<Arc<ConnectionManager>> {
        self.managers.read().get(channel_id).cloned()
    }

    /// Detach and return the manager for a channel, if any.
    pub fn detach(&self, channel_id: &str) -> Option<Arc<ConnectionManager>> {
        self.managers.write().remove(channel_id)
    }

    /// Attached channel ids.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.managers.read().keys().cloned().collect()
    }

    /// Connection count summed over every attached manager.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.managers
            .read()
            .values()
            .map(|manager| manager.count())
            .sum()
    }

    /// Detach every manager and close them concurrently.
    pub async fn close_all(&self) {
        let managers: Vec<Arc<ConnectionManager>> =
            self.managers.write().drain().map(|(_, m)| m).collect();
        futures::future::join_all(managers.iter().map(|manager| manager.close())).await;
    }
}
