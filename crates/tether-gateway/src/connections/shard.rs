//! One partition of the connection map.
//!
//! The shard mutex is never held across a transport operation or an await
//! point: eviction and shutdown snapshot the map, release the lock, and do
//! the blocking work outside the critical section.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::connection::DeviceConnection;
use crate::errors::RegistryError;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    REGISTRY_UPDATE_FAILURES_TOTAL,
};
use crate::registry::Registry;

pub(crate) struct Shard {
    connections: Mutex<HashMap<String, Arc<DeviceConnection>>>,
    registry: Arc<dyn Registry>,
}

impl Shard {
    pub(crate) fn new(capacity: usize, registry: Arc<dyn Registry>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(HashMap::with_capacity(capacity)),
            registry,
        })
    }

    /// Insert a connection, evicting any previous holder of the identifier.
    ///
    /// A registry refusal is fatal for the connection being registered; the
    /// caller unwinds it.
    pub(crate) fn register(&self, conn: Arc<DeviceConnection>) -> Result<(), RegistryError> {
        let evicted = {
            let mut connections = self.connections.lock();
            connections.insert(conn.identifier().to_owned(), Arc::clone(&conn))
        };
        if let Some(existing) = evicted {
            info!(identifier = %existing.identifier(), "evicting connection replaced by re-registration");
            existing.close();
            counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
        } else {
            gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        }
        counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
        self.registry.update(&conn)
    }

    pub(crate) fn find(&self, identifier: &str) -> Option<Arc<DeviceConnection>> {
        self.connections.lock().get(identifier).cloned()
    }

    /// Remove a connection, but only while the map still holds this exact
    /// pointer; a replacement registered under the same identifier stays.
    pub(crate) fn unregister(&self, conn: &DeviceConnection) {
        let removed = {
            let mut connections = self.connections.lock();
            match connections.get(conn.identifier()) {
                Some(stored) if std::ptr::eq(Arc::as_ptr(stored), conn) => {
                    connections.remove(conn.identifier())
                }
                _ => None,
            }
        };
        if let Some(stored) = removed {
            gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
            counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
            if let Err(e) = self.registry.remove(&stored) {
                warn!(identifier = %stored.identifier(), error = %e, "registry remove failed");
            }
        }
    }

    /// Advisory registry refresh; failures are logged, never fatal.
    pub(crate) fn update_registry(&self, conn: &DeviceConnection) {
        if let Err(e) = self.registry.update(conn) {
            counter!(REGISTRY_UPDATE_FAILURES_TOTAL).increment(1);
            warn!(identifier = %conn.identifier(), error = %e, "registry update failed");
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Close every connection and wait for its tasks, then empty the map.
    pub(crate) async fn close(&self) {
        let connections: Vec<Arc<DeviceConnection>> =
            { self.connections.lock().values().cloned().collect() };
        for conn in &connections {
            conn.close();
        }
        for conn in &connections {
            conn.wait().await;
        }
        self.connections.lock().clear();
    }
}
