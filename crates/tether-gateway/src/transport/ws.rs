//! Adapter for an upgraded `axum` WebSocket.
//!
//! The HTTP upgrade, routing, and authentication happen upstream; this
//! adapter only maps WebSocket messages onto [`Inbound`] events and frame
//! writes onto binary messages. Text messages are accepted as frame bytes,
//! matching peers that cannot send binary.

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{FrameTransport, Inbound, TransportReader, TransportWriter};
use crate::errors::TransportError;

/// A ready WebSocket as handed over by the upgrade handler.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl FrameTransport for WsTransport {
    fn split(self) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (sink, stream) = self.socket.split();
        (Box::new(WsReader { stream }), Box::new(WsWriter { sink }))
    }
}

/// Map one WebSocket message onto an inbound event.
fn inbound_from_message(message: Message) -> Inbound {
    match message {
        Message::Binary(bytes) => Inbound::Frame(bytes),
        Message::Text(text) => Inbound::Frame(Bytes::copy_from_slice(text.as_bytes())),
        Message::Ping(payload) => Inbound::Ping(payload),
        Message::Pong(payload) => Inbound::Pong(payload),
        Message::Close(frame) => Inbound::Close(
            frame.map(|f| Bytes::copy_from_slice(f.reason.as_bytes())),
        ),
    }
}

struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportReader for WsReader {
    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        match self.stream.next().await {
            None => Err(TransportError::Closed),
            Some(Err(e)) => Err(TransportError::Read(e.to_string())),
            Some(Ok(message)) => Ok(inbound_from_message(message)),
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl WsWriter {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.send(Message::Binary(frame)).await
    }

    async fn send_pong(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.send(Message::Pong(payload)).await
    }

    async fn send_close(&mut self, reason: Option<Bytes>) -> Result<(), TransportError> {
        let frame = reason.map(|r| CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from(String::from_utf8_lossy(&r).into_owned()),
        });
        self.send(Message::Close(frame)).await
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }
}
