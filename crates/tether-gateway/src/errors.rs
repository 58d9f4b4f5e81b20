//! Error types for the gateway.
//!
//! One enum per domain, [`thiserror`]-derived:
//!
//! - [`TransportError`]: I/O failure on the framed transport; fatal for the
//!   owning connection
//! - [`ConnectionError`]: per-send and per-frame failures surfaced to callers
//!   and handlers
//! - [`RegistryError`]: registry adapter refusals
//! - [`ManagerError`]: construction and registration failures
//! - [`StatusError`]: status snapshot assembly failures

use std::time::Duration;

use thiserror::Error;

use tether_core::FrameError;

/// I/O failure on the framed transport.
///
/// Any transport-level error closes the owning connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Reading the next record failed.
    #[error("transport read failed: {0}")]
    Read(String),

    /// Writing a record failed.
    #[error("transport write failed: {0}")]
    Write(String),

    /// No record arrived within the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,

    /// A record could not be written within the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// The peer went away without a close frame.
    #[error("transport closed")]
    Closed,
}

/// Failure of a single send or inbound frame on a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Transport-level failure; the connection is being torn down.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An inbound record could not be decoded. Not fatal by itself.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// The connection is closed or concurrently closing.
    #[error("connection is closed")]
    Closed,

    /// The writer inbox stayed full past the request deadline.
    #[error("request enqueue timed out after {0:?}")]
    EnqueueTimeout(Duration),

    /// No response (or write acknowledgement) arrived within the deadline.
    #[error("response timed out after {0:?}")]
    ResponseTimeout(Duration),

    /// A response arrived without a matching pending request, typically
    /// after the caller already timed out.
    #[error("unexpected response for message {0}")]
    UnexpectedResponse(String),
}

/// Registry adapter refusal.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry has been closed.
    #[error("registry is closed")]
    Closed,

    /// The backing store refused the operation.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Connection manager construction or registration failure.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager is in shutdown; the offered transport was closed.
    #[error("connection manager is closed")]
    Closed,

    /// Construction-time configuration rejection.
    #[error("invalid gateway config: {0}")]
    InvalidConfig(String),

    /// The registry refused the connection at registration time.
    #[error("registry refused connection: {0}")]
    Registry(#[from] RegistryError),
}

/// Status snapshot assembly failure.
#[derive(Debug, Error)]
pub enum StatusError {
    /// No manager is attached for the requested channel.
    #[error("no connection manager for channel: {0}")]
    ChannelNotManaged(String),

    /// History was requested but no history store is available.
    #[error("history requested but no history store configured")]
    HistoryUnavailable,

    /// The history store failed the lookup.
    #[error("history lookup failed: {0}")]
    History(String),
}
