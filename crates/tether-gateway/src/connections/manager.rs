//! Fleet root: builds engines, routes by hashed identifier, closes in order.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::FxHasher;
use tracing::{info, warn};

use super::connection::DeviceConnection;
use super::handler::FrameHandler;
use super::shard::Shard;
use super::Metadata;
use crate::config::{GatewayConfig, RegistryKind};
use crate::errors::ManagerError;
use crate::registry::{MemoryRegistry, Registry};
use crate::transport::FrameTransport;

/// Sharded manager for the device connections of one channel.
pub struct ConnectionManager {
    shards: Vec<Arc<Shard>>,
    registry: Arc<dyn Registry>,
    config: GatewayConfig,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("shards", &self.shards.len())
            .field("config", &self.config)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ConnectionManager {
    /// Construct with the registry named in the config.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidConfig`] for a zero shard count,
    /// [`ManagerError::Registry`] when the registry ping fails.
    pub fn new(config: GatewayConfig) -> Result<Arc<Self>, ManagerError> {
        let registry: Arc<dyn Registry> = match config.registry {
            RegistryKind::Memory => Arc::new(MemoryRegistry::new()),
        };
        Self::with_registry(config, registry)
    }

    /// Construct with a caller-supplied registry adapter.
    ///
    /// # Errors
    ///
    /// Same as [`new`].
    ///
    /// [`new`]: ConnectionManager::new
    pub fn with_registry(
        config: GatewayConfig,
        registry: Arc<dyn Registry>,
    ) -> Result<Arc<Self>, ManagerError> {
        if config.n_shards == 0 {
            return Err(ManagerError::InvalidConfig("n_shards must be positive".into()));
        }
        registry.ping()?;
        let shards = (0..config.n_shards)
            .map(|_| Shard::new(config.init_shard_size, Arc::clone(&registry)))
            .collect();
        Ok(Arc::new(Self {
            shards,
            registry,
            config,
            closed: AtomicBool::new(false),
        }))
    }

    /// Admit a freshly handshaken transport as a managed connection.
    ///
    /// The connection is registered with its shard before the engine tasks
    /// start; a registry refusal unwinds the engine and surfaces the error.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Closed`] when the manager is in shutdown (the
    /// transport is closed before returning), [`ManagerError::Registry`]
    /// when the registry refuses the registration.
    pub async fn new_connection(
        &self,
        identifier: impl Into<String>,
        transport: impl FrameTransport,
        handler: impl FrameHandler,
        metadata: Metadata,
    ) -> Result<Arc<DeviceConnection>, ManagerError> {
        let identifier = identifier.into();
        let (reader, mut writer) = transport.split();
        if self.closed.load(Ordering::SeqCst) {
            let _ = writer.send_close(None).await;
            let _ = writer.shutdown().await;
            drop(reader);
            return Err(ManagerError::Closed);
        }

        let shard = self.shard_for(&identifier);
        let (conn, parts) = DeviceConnection::new(
            identifier,
            Arc::new(handler),
            metadata,
            self.config.timeouts,
            self.config.request_queue_size,
            Arc::downgrade(shard),
        );
        if let Err(e) = shard.register(Arc::clone(&conn)) {
            conn.close();
            conn.wait().await;
            return Err(ManagerError::Registry(e));
        }
        conn.start(parts, reader, writer);
        info!(identifier = %conn.identifier(), "device connected");
        Ok(conn)
    }

    /// Look up a live connection by identifier.
    #[must_use]
    pub fn find(&self, identifier: &str) -> Option<Arc<DeviceConnection>> {
        self.shard_for(identifier).find(identifier)
    }

    /// Fleet-wide connection count.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shards.iter().map(|shard| shard.count()).sum()
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Shut down: refuse new connections, close every shard concurrently,
    /// then close the registry. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(shards = self.shards.len(), "closing connection manager");
        futures::future::join_all(self.shards.iter().map(|shard| shard.close())).await;
        if let Err(e) = self.registry.close() {
            warn!(error = %e, "registry close failed");
        }
    }

    fn shard_for(&self, identifier: &str) -> &Arc<Shard> {
        &self.shards[shard_index(identifier, self.shards.len())]
    }
}

/// Deterministic in-process shard selection: a fast non-cryptographic hash
/// truncated to 32 bits, modulo the shard count.
pub(crate) fn shard_index(identifier: &str, n_shards: usize) -> usize {
    let mut hasher = FxHasher::default();
    identifier.hash(&mut hasher);
    (hasher.finish() as u32 as usize) % n_shards
}
