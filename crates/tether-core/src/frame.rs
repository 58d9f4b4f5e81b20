//! Binary frame codec for the device protocol.
//!
//! A frame is one kind byte, a big-endian `u16` id length, the UTF-8 message
//! id, and an opaque payload filling the remainder of the record. The
//! transport decides record boundaries; the codec only guarantees that
//! [`Frame::decode`] inverts [`Frame::encode`] bit-for-bit for well-formed
//! frames.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Fixed header size: kind byte plus id length prefix.
pub const HEADER_LEN: usize = 3;

/// Frame type discriminant as it appears on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// One-way request; no response is expected.
    AsyncRequest = 1,
    /// Request whose id will be echoed back in a matching [`Response`].
    ///
    /// [`Response`]: FrameKind::Response
    SyncRequest = 2,
    /// Reply to an earlier [`SyncRequest`] carrying the same id.
    ///
    /// [`SyncRequest`]: FrameKind::SyncRequest
    Response = 3,
    /// Teardown notice; the payload, if any, is a close reason.
    Close = 4,
}

impl FrameKind {
    /// Parse a wire discriminant.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::AsyncRequest),
            2 => Some(Self::SyncRequest),
            3 => Some(Self::Response),
            4 => Some(Self::Close),
            _ => None,
        }
    }

    /// Wire discriminant for this kind.
    #[must_use]
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AsyncRequest => write!(f, "async_request"),
            Self::SyncRequest => write!(f, "sync_request"),
            Self::Response => write!(f, "response"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Codec failure: the bytes could not yield a complete frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The record ended before a complete header or id could be read.
    #[error("frame truncated: {needed} more bytes required")]
    Truncated {
        /// How many additional bytes were required.
        needed: usize,
    },

    /// The kind byte is not a known discriminant.
    #[error("unknown frame kind: {0:#04x}")]
    UnknownKind(u8),

    /// The id bytes are not valid UTF-8.
    #[error("frame id is not valid utf-8")]
    InvalidId,

    /// The id does not fit the `u16` length prefix.
    #[error("frame id exceeds 65535 bytes")]
    IdTooLong,
}

/// One typed message unit transmitted over the framed transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame type.
    pub kind: FrameKind,
    /// Message id; unique per outbound sync request and echoed by responses.
    pub id: String,
    /// Opaque application payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(kind: FrameKind, id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// Create a close frame with an optional reason payload.
    #[must_use]
    pub fn close(reason: Option<Bytes>) -> Self {
        Self {
            kind: FrameKind::Close,
            id: String::new(),
            payload: reason.unwrap_or_default(),
        }
    }

    /// Encode to the wire representation.
    ///
    /// # Errors
    ///
    /// Fails with [`FrameError::IdTooLong`] when the id does not fit the
    /// `u16` length prefix.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let id_len = u16::try_from(self.id.len()).map_err(|_| FrameError::IdTooLong)?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.id.len() + self.payload.len());
        buf.put_u8(self.kind.as_byte());
        buf.put_u16(id_len);
        buf.put_slice(self.id.as_bytes());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode from the wire representation.
    ///
    /// # Errors
    ///
    /// Fails with a [`FrameError`] when the bytes cannot yield a complete
    /// header, the kind byte is unknown, or the id is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut buf = bytes;
        if buf.remaining() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN - buf.remaining(),
            });
        }
        let kind_byte = buf.get_u8();
        let kind = FrameKind::from_byte(kind_byte).ok_or(FrameError::UnknownKind(kind_byte))?;
        let id_len = buf.get_u16() as usize;
        if buf.remaining() < id_len {
            return Err(FrameError::Truncated {
                needed: id_len - buf.remaining(),
            });
        }
        let id = std::str::from_utf8(&buf[..id_len])
            .map_err(|_| FrameError::InvalidId)?
            .to_owned();
        buf.advance(id_len);
        Ok(Self {
            kind,
            id,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}
