//! # tether-core
//!
//! Wire-level building blocks shared by every component that speaks the
//! Tether device protocol:
//!
//! - [`Frame`] / [`FrameKind`]: the binary frame codec
//! - [`FrameError`]: decode/encode failures
//! - [`time`]: millisecond timestamp helpers (all externally reported
//!   timestamps and durations are integer milliseconds since the Unix epoch)

#![deny(unsafe_code)]

pub mod frame;
pub mod time;

pub use frame::{Frame, FrameError, FrameKind};
