//! User-supplied frame handler callbacks.

use tether_core::Frame;

use super::connection::DeviceConnection;
use crate::errors::ConnectionError;

/// Callback invoked by the reader task for every inbound frame and for read
/// errors.
///
/// Exactly one of `frame` and `error` is `Some`, except for responses that
/// arrive without a matching pending request, where both are
/// (frame + [`ConnectionError::UnexpectedResponse`]).
///
/// Handlers run synchronously on the reader task: they must not block
/// indefinitely, and must never call [`DeviceConnection::send_sync`] on
/// their own connection, because the reader that would resolve the response
/// is the task running the handler. Panics are trapped at the reader boundary and
/// logged; they never kill the reader.
pub trait FrameHandler: Send + Sync + 'static {
    /// Observe one inbound frame or read error.
    fn on_frame(
        &self,
        conn: &DeviceConnection,
        frame: Option<&Frame>,
        error: Option<&ConnectionError>,
    );
}

impl<F> FrameHandler for F
where
    F: Fn(&DeviceConnection, Option<&Frame>, Option<&ConnectionError>) + Send + Sync + 'static,
{
    fn on_frame(
        &self,
        conn: &DeviceConnection,
        frame: Option<&Frame>,
        error: Option<&ConnectionError>,
    ) {
        self(conn, frame, error);
    }
}
