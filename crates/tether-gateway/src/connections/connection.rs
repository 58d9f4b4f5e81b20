//! Per-connection message engine.
//!
//! Each connection owns exactly two tasks. The writer drains a bounded inbox
//! in caller order, applying the write deadline per frame; the reader pulls
//! inbound events under the read deadline, dispatches frames to the handler,
//! and resolves pending synchronous requests. Teardown is close-once: the
//! inbox is closed so the writer drains and exits, the reader stops at its
//! next iteration boundary, and a one-shot rendezvous lets the writer emit a
//! final close frame before releasing the transport.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use tether_core::{time, Frame, FrameKind};

use super::handler::FrameHandler;
use super::pending::{PendingTable, SendResult};
use super::shard::Shard;
use super::Metadata;
use crate::config::TimeoutConfig;
use crate::errors::{ConnectionError, TransportError};
use crate::metrics::{FRAMES_RECEIVED_TOTAL, FRAMES_SENT_TOTAL, PONGS_SENT_TOTAL};
use crate::transport::{Inbound, TransportReader, TransportWriter};

/// One unit of work for the writer task.
pub(crate) enum WriteCommand {
    /// A frame to transmit, with the slot the caller is waiting on.
    Frame {
        frame: Frame,
        reply: oneshot::Sender<SendResult>,
    },
    /// A pong replying to a peer ping; best-effort, nobody waits on it.
    Pong { payload: Bytes },
}

/// Receiver ends handed to [`DeviceConnection::start`] when the tasks launch.
pub(crate) struct EngineParts {
    write_rx: mpsc::Receiver<WriteCommand>,
    close_rx: oneshot::Receiver<Option<Bytes>>,
}

/// A live session with one remote device.
pub struct DeviceConnection {
    identifier: String,
    created_at: DateTime<Utc>,
    last_pinged_at: AtomicI64,
    metadata: Metadata,
    handler: Arc<dyn FrameHandler>,
    timeouts: TimeoutConfig,
    pending: PendingTable,
    next_id: AtomicU64,
    write_tx: parking_lot::Mutex<Option<mpsc::Sender<WriteCommand>>>,
    close_tx: parking_lot::Mutex<Option<oneshot::Sender<Option<Bytes>>>>,
    stop: CancellationToken,
    closed: AtomicBool,
    tasks: TaskTracker,
    shard: Weak<Shard>,
}

impl DeviceConnection {
    pub(crate) fn new(
        identifier: String,
        handler: Arc<dyn FrameHandler>,
        metadata: Metadata,
        timeouts: TimeoutConfig,
        queue_size: usize,
        shard: Weak<Shard>,
    ) -> (Arc<Self>, EngineParts) {
        let (write_tx, write_rx) = mpsc::channel(queue_size.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let now = Utc::now();
        let conn = Arc::new(Self {
            identifier,
            created_at: now,
            last_pinged_at: AtomicI64::new(time::to_millis(now)),
            metadata,
            handler,
            timeouts,
            pending: PendingTable::new(),
            next_id: AtomicU64::new(1),
            write_tx: parking_lot::Mutex::new(Some(write_tx)),
            close_tx: parking_lot::Mutex::new(Some(close_tx)),
            stop: CancellationToken::new(),
            closed: AtomicBool::new(false),
            tasks: TaskTracker::new(),
            shard,
        });
        (conn, EngineParts { write_rx, close_rx })
    }

    /// Launch the reader and writer tasks.
    pub(crate) fn start(
        self: &Arc<Self>,
        parts: EngineParts,
        reader: Box<dyn TransportReader>,
        writer: Box<dyn TransportWriter>,
    ) {
        let pong_tx = self.write_tx.lock().clone();
        self.tasks
            .spawn(Self::read_loop(Arc::clone(self), reader, pong_tx));
        self.tasks
            .spawn(Self::write_loop(Arc::clone(self), writer, parts.write_rx, parts.close_rx));
        self.tasks.close();
    }

    /// Stable device identifier, unique within the owning channel.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// When this connection was established.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last peer activity, as milliseconds since the Unix epoch. Monotonic
    /// non-decreasing for the lifetime of the connection.
    #[must_use]
    pub fn last_pinged_at_ms(&self) -> i64 {
        self.last_pinged_at.load(Ordering::Relaxed)
    }

    /// Connection metadata, immutable after creation.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Connection type tag.
    #[must_use]
    pub fn connection_type(&self) -> &'static str {
        "websocket"
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of synchronous requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Send a one-way request; resolves once the writer has transmitted the
    /// frame.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::EnqueueTimeout`] when the inbox stays full past the
    /// request deadline, [`ConnectionError::Closed`] on a closed connection,
    /// or the transport error that failed the write.
    pub async fn send_async(&self, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        let id = self.next_message_id();
        self.send_message(FrameKind::AsyncRequest, id, payload.into())
            .await
            .map(|_| ())
    }

    /// Send a response frame keyed by a caller-supplied message id.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`send_async`].
    ///
    /// [`send_async`]: DeviceConnection::send_async
    pub async fn send_response(
        &self,
        message_id: &str,
        payload: impl Into<Bytes>,
    ) -> Result<(), ConnectionError> {
        self.send_message(FrameKind::Response, message_id.to_owned(), payload.into())
            .await
            .map(|_| ())
    }

    /// Send a synchronous request and block until the matching response
    /// arrives or the response deadline fires.
    ///
    /// Must not be called from this connection's own frame handler: the
    /// reader that resolves responses is the task running the handler.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::ResponseTimeout`] when no response arrives in
    /// time (the pending entry is removed before returning), plus the
    /// failure modes of [`send_async`].
    ///
    /// [`send_async`]: DeviceConnection::send_async
    pub async fn send_sync(&self, payload: impl Into<Bytes>) -> Result<Bytes, ConnectionError> {
        let id = self.next_message_id();
        self.send_message(FrameKind::SyncRequest, id, payload.into())
            .await
    }

    /// Shut the connection down. Idempotent; the body runs at most once.
    pub fn close(&self) {
        self.close_with_reason(None);
    }

    /// Shut the connection down, attaching a reason to the final close frame.
    pub fn close_with_reason(&self, reason: Option<Bytes>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(identifier = %self.identifier, "closing connection");
        // closing the inbox: the writer drains what was accepted, then exits
        self.write_tx.lock().take();
        // the reader observes this at its next iteration boundary
        self.stop.cancel();
        if let Some(close_tx) = self.close_tx.lock().take() {
            let _ = close_tx.send(reason);
        }
        self.tasks.close();
        if let Some(shard) = self.shard.upgrade() {
            shard.unregister(self);
        }
    }

    /// Wait until the reader and writer tasks have exited.
    pub async fn wait(&self) {
        self.tasks.wait().await;
    }

    fn next_message_id(&self) -> String {
        format!("{:x}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn sender(&self) -> Result<mpsc::Sender<WriteCommand>, ConnectionError> {
        self.write_tx.lock().clone().ok_or(ConnectionError::Closed)
    }

    async fn send_message(
        &self,
        kind: FrameKind,
        id: String,
        payload: Bytes,
    ) -> Result<Bytes, ConnectionError> {
        let tx = self.sender()?;
        let sync = kind == FrameKind::SyncRequest;
        let (reply_tx, reply_rx) = oneshot::channel();
        let frame = Frame::new(kind, id.clone(), payload);
        let t_request = self.timeouts.request();

        let enqueued = timeout(
            t_request,
            tx.send(WriteCommand::Frame {
                frame,
                reply: reply_tx,
            }),
        )
        .await;
        drop(tx);
        match enqueued {
            Err(_) => return Err(ConnectionError::EnqueueTimeout(t_request)),
            // the inbox closed under us; report, never panic
            Ok(Err(_)) => return Err(ConnectionError::Closed),
            Ok(Ok(())) => {}
        }

        let deadline = if sync {
            self.timeouts.response()
        } else {
            t_request
        };
        let outcome = timeout(deadline, reply_rx).await;
        if sync {
            self.pending.remove(&id);
        }
        match outcome {
            Err(_) => Err(ConnectionError::ResponseTimeout(deadline)),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Ok(Ok(Ok(Some(frame)))) => Ok(frame.payload),
            Ok(Ok(Ok(None))) => Ok(Bytes::new()),
            Ok(Ok(Err(e))) => Err(e),
        }
    }

    /// Record peer activity and propagate it to the registry.
    fn touch(&self) {
        self.last_pinged_at
            .fetch_max(time::now_millis(), Ordering::Relaxed);
        if let Some(shard) = self.shard.upgrade() {
            shard.update_registry(self);
        }
    }

    fn invoke_handler(&self, frame: Option<&Frame>, error: Option<&ConnectionError>) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handler.on_frame(self, frame, error);
        }));
        if result.is_err() {
            warn!(identifier = %self.identifier, "frame handler panicked");
        }
    }

    async fn read_loop(
        conn: Arc<Self>,
        mut reader: Box<dyn TransportReader>,
        pong_tx: Option<mpsc::Sender<WriteCommand>>,
    ) {
        let t_read = conn.timeouts.read();
        loop {
            let inbound = tokio::select! {
                () = conn.stop.cancelled() => break,
                read = timeout(t_read, reader.recv()) => match read {
                    Err(_) => Err(TransportError::ReadTimeout),
                    Ok(result) => result,
                },
            };
            match inbound {
                Err(e) => {
                    let err = ConnectionError::Transport(e);
                    conn.invoke_handler(None, Some(&err));
                    conn.close();
                    break;
                }
                Ok(Inbound::Ping(_payload)) => {
                    debug!(identifier = %conn.identifier, "peer ping");
                    conn.touch();
                    let pong = Bytes::from(time::now_millis().to_string());
                    if let Some(tx) = &pong_tx {
                        if tx.try_send(WriteCommand::Pong { payload: pong }).is_err() {
                            warn!(identifier = %conn.identifier, "pong dropped: writer inbox backed up");
                        }
                    }
                }
                Ok(Inbound::Pong(_)) => conn.touch(),
                Ok(Inbound::Close(reason)) => {
                    conn.touch();
                    let frame = Frame::close(reason);
                    conn.invoke_handler(Some(&frame), None);
                    conn.close();
                    break;
                }
                Ok(Inbound::Frame(bytes)) => {
                    conn.touch();
                    counter!(FRAMES_RECEIVED_TOTAL).increment(1);
                    match Frame::decode(&bytes) {
                        Err(e) => {
                            let err = ConnectionError::MalformedFrame(e);
                            conn.invoke_handler(None, Some(&err));
                        }
                        Ok(frame) if frame.kind == FrameKind::Close => {
                            conn.invoke_handler(Some(&frame), None);
                            conn.close();
                            break;
                        }
                        Ok(frame) if frame.kind == FrameKind::Response => {
                            match conn.pending.take(&frame.id) {
                                Some(slot) => {
                                    // entry removed above, before delivery
                                    let _ = slot.send(Ok(Some(frame.clone())));
                                    conn.invoke_handler(Some(&frame), None);
                                }
                                None => {
                                    let err =
                                        ConnectionError::UnexpectedResponse(frame.id.clone());
                                    conn.invoke_handler(Some(&frame), Some(&err));
                                }
                            }
                        }
                        Ok(frame) => conn.invoke_handler(Some(&frame), None),
                    }
                }
            }
        }
        // dropping pong_tx releases the reader's hold on the writer inbox
    }

    async fn write_loop(
        conn: Arc<Self>,
        mut writer: Box<dyn TransportWriter>,
        mut write_rx: mpsc::Receiver<WriteCommand>,
        close_rx: oneshot::Receiver<Option<Bytes>>,
    ) {
        let t_write = conn.timeouts.write();
        while let Some(command) = write_rx.recv().await {
            match command {
                WriteCommand::Frame { frame, reply } => {
                    let encoded = match frame.encode() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            let _ = reply.send(Err(ConnectionError::MalformedFrame(e)));
                            continue;
                        }
                    };
                    let written = match timeout(t_write, writer.send_frame(encoded)).await {
                        Err(_) => Err(TransportError::WriteTimeout),
                        Ok(result) => result,
                    };
                    match written {
                        Err(e) => {
                            warn!(identifier = %conn.identifier, error = %e, "frame write failed");
                            let _ = reply.send(Err(ConnectionError::Transport(e)));
                            conn.close();
                        }
                        Ok(()) => {
                            counter!(FRAMES_SENT_TOTAL).increment(1);
                            if frame.kind == FrameKind::SyncRequest {
                                // a caller that already gave up dropped its
                                // receiver; inserting would leave a dead entry
                                if !reply.is_closed() {
                                    conn.pending.insert(frame.id, reply);
                                }
                            } else {
                                let _ = reply.send(Ok(None));
                            }
                        }
                    }
                }
                WriteCommand::Pong { payload } => {
                    let written = match timeout(t_write, writer.send_pong(payload)).await {
                        Err(_) => Err(TransportError::WriteTimeout),
                        Ok(result) => result,
                    };
                    match written {
                        Err(e) => {
                            warn!(identifier = %conn.identifier, error = %e, "pong write failed");
                            conn.close();
                        }
                        Ok(()) => {
                            counter!(PONGS_SENT_TOTAL).increment(1);
                        }
                    }
                }
            }
        }
        // inbox closed and drained: emit the final close frame, best-effort
        let reason = close_rx.await.unwrap_or(None);
        let _ = timeout(t_write, writer.send_close(reason)).await;
        let _ = writer.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn stub(identifier: &str) -> (Arc<Self>, EngineParts) {
        Self::new(
            identifier.to_owned(),
            Arc::new(|_: &DeviceConnection, _: Option<&Frame>, _: Option<&ConnectionError>| {}),
            Metadata::new(),
            TimeoutConfig::default(),
            8,
            Weak::new(),
        )
    }
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("identifier", &self.identifier)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
