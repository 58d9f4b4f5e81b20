//! Registry adapters for external connection visibility.
//!
//! The registry mirrors the current set of connections into some directory:
//! in memory by default, or an external system supplied at manager
//! construction. Refusals during initial registration are fatal for that
//! connection; refusals on later updates are advisory and only logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::connections::DeviceConnection;
use crate::errors::RegistryError;

/// Minimal capability set every registry implementation provides.
pub trait Registry: Send + Sync {
    /// Probe the backing store; construction aborts when this fails.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] when the backing store is unreachable.
    fn ping(&self) -> Result<(), RegistryError>;

    /// Reflect the connection's current state.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] when the store refuses the write.
    fn update(&self, conn: &DeviceConnection) -> Result<(), RegistryError>;

    /// Drop the connection from the directory.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] when the store refuses the delete.
    fn remove(&self, conn: &DeviceConnection) -> Result<(), RegistryError>;

    /// Release the backing store. Called once, after all shards have closed.
    ///
    /// # Errors
    ///
    /// [`RegistryError`] when teardown fails.
    fn close(&self) -> Result<(), RegistryError>;
}

/// One directory entry, a plain snapshot of connection state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Connection type tag.
    pub connection_type: String,
    /// Last peer activity, milliseconds since the Unix epoch.
    pub last_pinged_at: i64,
}

/// In-memory registry; satisfies the contract trivially.
#[derive(Default)]
pub struct MemoryRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    closed: AtomicBool,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of directory entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of the entry for `identifier`, if present.
    #[must_use]
    pub fn entry(&self, identifier: &str) -> Option<RegistryEntry> {
        self.entries.read().get(identifier).cloned()
    }

    fn ensure_open(&self) -> Result<(), RegistryError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(RegistryError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Registry for MemoryRegistry {
    fn ping(&self) -> Result<(), RegistryError> {
        self.ensure_open()
    }

    fn update(&self, conn: &DeviceConnection) -> Result<(), RegistryError> {
        self.ensure_open()?;
        self.entries.write().insert(
            conn.identifier().to_owned(),
            RegistryEntry {
                connection_type: conn.connection_type().to_owned(),
                last_pinged_at: conn.last_pinged_at_ms(),
            },
        );
        Ok(())
    }

    fn remove(&self, conn: &DeviceConnection) -> Result<(), RegistryError> {
        self.ensure_open()?;
        self.entries.write().remove(conn.identifier());
        Ok(())
    }

    fn close(&self) -> Result<(), RegistryError> {
        self.closed.store(true, Ordering::SeqCst);
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_open_registry() {
        let registry = MemoryRegistry::new();
        assert!(registry.ping().is_ok());
    }

    #[test]
    fn update_and_remove_round_trip() {
        let registry = MemoryRegistry::new();
        let (conn, _parts) = DeviceConnection::stub("dev-1");

        registry.update(&conn).unwrap();
        assert_eq!(registry.len(), 1);
        let entry = registry.entry("dev-1").unwrap();
        assert_eq!(entry.connection_type, "websocket");
        assert!(entry.last_pinged_at > 0);

        registry.remove(&conn).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn update_overwrites_entry() {
        let registry = MemoryRegistry::new();
        let (conn, _parts) = DeviceConnection::stub("dev-1");
        registry.update(&conn).unwrap();
        registry.update(&conn).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closed_registry_refuses_everything() {
        let registry = MemoryRegistry::new();
        let (conn, _parts) = DeviceConnection::stub("dev-1");
        registry.update(&conn).unwrap();

        registry.close().unwrap();
        assert!(matches!(registry.ping(), Err(RegistryError::Closed)));
        assert!(matches!(registry.update(&conn), Err(RegistryError::Closed)));
        assert!(matches!(registry.remove(&conn), Err(RegistryError::Closed)));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_missing_entry_is_ok() {
        let registry = MemoryRegistry::new();
        let (conn, _parts) = DeviceConnection::stub("dev-1");
        assert!(registry.remove(&conn).is_ok());
    }
}
