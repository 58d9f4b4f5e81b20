//! Transport seam between the connection engine and a concrete socket.
//!
//! The upstream layer performs the handshake and hands a ready
//! [`FrameTransport`] to the manager; the engine splits it into a read half
//! and a write half, one per task. Record boundaries (binary frames) are the
//! transport's concern; frame encoding is not.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ws`   | Adapter for an upgraded `axum` WebSocket |
//! | `pair` | In-process transport over bounded channels, plus a peer handle for driving the remote end |

pub mod pair;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;

pub use pair::{pair, PairPeer, PairTransport};
pub use ws::WsTransport;

/// One inbound event from the transport.
#[derive(Clone, Debug)]
pub enum Inbound {
    /// A binary record carrying an encoded frame.
    Frame(Bytes),
    /// Transport-level ping from the peer; elicits a pong.
    Ping(Bytes),
    /// Transport-level pong from the peer; refreshes liveness only.
    Pong(Bytes),
    /// The peer closed the connection, optionally with a reason.
    Close(Option<Bytes>),
}

/// Read half of a framed transport, owned by the reader task.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Receive the next inbound event, blocking until one arrives.
    async fn recv(&mut self) -> Result<Inbound, TransportError>;
}

/// Write half of a framed transport, owned by the writer task.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Transmit one encoded frame as a binary record.
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Transmit a transport-level pong.
    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Transmit the transport-level close notice.
    async fn send_close(&mut self, reason: Option<Bytes>) -> Result<(), TransportError>;

    /// Release the underlying socket.
    async fn shutdown(&mut self) -> Result<(), TransportError>;
}

/// A ready transport as delivered by the upstream handshake layer.
pub trait FrameTransport: Send + 'static {
    /// Split into the reader and writer halves consumed by the engine tasks.
    fn split(self) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}
