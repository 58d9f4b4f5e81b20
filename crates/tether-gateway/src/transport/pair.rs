//! In-process transport over bounded channels.
//!
//! [`pair`] yields a [`PairTransport`] for the gateway side and a
//! [`PairPeer`] handle playing the remote device: tests and in-process
//! simulations drive the peer directly with decoded frames, pings, and close
//! notices.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use tether_core::Frame;

use super::{FrameTransport, Inbound, TransportReader, TransportWriter};
use crate::errors::TransportError;

/// Create a connected transport/peer pair with the given channel capacity.
#[must_use]
pub fn pair(capacity: usize) -> (PairTransport, PairPeer) {
    let capacity = capacity.max(1);
    let (gateway_tx, peer_rx) = mpsc::channel(capacity);
    let (peer_tx, gateway_rx) = mpsc::channel(capacity);
    (
        PairTransport {
            tx: gateway_tx,
            rx: gateway_rx,
        },
        PairPeer {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}

/// Gateway-side half of an in-process transport.
pub struct PairTransport {
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Inbound>,
}

impl FrameTransport for PairTransport {
    fn split(self) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        (
            Box::new(PairReader { rx: self.rx }),
            Box::new(PairWriter { tx: Some(self.tx) }),
        )
    }
}

struct PairReader {
    rx: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl TransportReader for PairReader {
    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

struct PairWriter {
    tx: Option<mpsc::Sender<Inbound>>,
}

impl PairWriter {
    async fn send(&mut self, event: Inbound) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(event)
            .await
            .map_err(|_| TransportError::Write("peer receiver dropped".into()))
    }
}

#[async_trait]
impl TransportWriter for PairWriter {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.send(Inbound::Frame(frame)).await
    }

    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.send(Inbound::Pong(payload)).await
    }

    async fn send_close(&mut self, reason: Option<Bytes>) -> Result<(), TransportError> {
        self.send(Inbound::Close(reason)).await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

/// Remote end of an in-process transport, driven directly.
///
/// Events written by the gateway arrive via [`recv`]: encoded frames, pongs,
/// and the final close notice.
///
/// [`recv`]: PairPeer::recv
pub struct PairPeer {
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Inbound>,
}

impl PairPeer {
    /// Send an encoded frame to the gateway.
    ///
    /// # Errors
    ///
    /// Fails when the frame cannot be encoded or the gateway side is gone.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame
            .encode()
            .map_err(|e| TransportError::Write(e.to_string()))?;
        self.send(Inbound::Frame(bytes)).await
    }

    /// Send raw record bytes to the gateway, bypassing the codec.
    ///
    /// # Errors
    ///
    /// Fails when the gateway side is gone.
    pub async fn send_raw(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.send(Inbound::Frame(bytes)).await
    }

    /// Send a transport-level ping.
    ///
    /// # Errors
    ///
    /// Fails when the gateway side is gone.
    pub async fn send_ping(&self, payload: Bytes) -> Result<(), TransportError> {
        self.send(Inbound::Ping(payload)).await
    }

    /// Send a close notice, optionally with a reason.
    ///
    /// # Errors
    ///
    /// Fails when the gateway side is gone.
    pub async fn send_close(&self, reason: Option<Bytes>) -> Result<(), TransportError> {
        self.send(Inbound::Close(reason)).await
    }

    /// Receive the next event written by the gateway, or `None` once the
    /// gateway side has shut down.
    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }

    async fn send(&self, event: Inbound) -> Result<(), TransportError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| TransportError::Write("gateway receiver dropped".into()))
    }
}
