//! Pending synchronous requests awaiting a matching response.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use tether_core::Frame;

use crate::errors::ConnectionError;

/// Outcome delivered to a sender's one-shot slot: a response frame for sync
/// requests, empty success once the writer has transmitted anything else.
pub(crate) type SendResult = Result<Option<Frame>, ConnectionError>;

/// Mutex-guarded map from message id to the slot awaiting its response.
///
/// An entry exists iff a synchronous request with that id is awaiting a
/// response. [`take`] is the only way to obtain a stored slot, so removal
/// always happens before delivery: whichever of the reader resolving a
/// response and the caller timing out wins the race owns the slot, and the
/// loser finds the entry gone.
///
/// [`take`]: PendingTable::take
#[derive(Default)]
pub(crate) struct PendingTable {
    slots: Mutex<HashMap<String, oneshot::Sender<SendResult>>>,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store the slot for an in-flight sync request.
    pub(crate) fn insert(&self, id: String, slot: oneshot::Sender<SendResult>) {
        self.slots.lock().insert(id, slot);
    }

    /// Remove and return the slot for `id`, if any.
    pub(crate) fn take(&self, id: &str) -> Option<oneshot::Sender<SendResult>> {
        self.slots.lock().remove(id)
    }

    /// Drop the entry for `id`, if any.
    pub(crate) fn remove(&self, id: &str) {
        self.slots.lock().remove(id);
    }

    /// Number of requests currently awaiting a response.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
