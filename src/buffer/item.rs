//! Queue items: the unit of data a buffer transports.

use serde::{Deserialize, Serialize};

use crate::error::Fault;

/// A single element of a buffer's FIFO queue.
///
/// A buffer carries any number of `Value` items followed by at most one
/// `Complete` marker. Once the marker has been enqueued the buffer is
/// terminated and rejects further publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item<T> {
    /// A payload value.
    Value(T),
    /// Terminal marker, optionally carrying the error that ended the stream.
    Complete(Option<Fault>),
}

impl<T> Item<T> {
    /// Returns `true` for the terminal marker.
    pub fn is_complete(&self) -> bool {
        matches!(self, Item::Complete(_))
    }
}
