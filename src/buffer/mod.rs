//! # Buffer: typed single-subscriber, multi-publisher FIFO.
//!
//! A [`Buffer`] transports values of one type from any number of publishers
//! to at most one subscriber, in FIFO order, terminated by at most one
//! completion marker that may carry a structured error.
//!
//! ## Key characteristics
//! - **Scoped attachment**: [`Buffer::publish`] and [`Buffer::subscribe`]
//!   return handles that release their slot on drop.
//! - **Selection without polling**: the subscriber's [`Wakeup`] is signalled
//!   on every publish; one wakeup can be shared across many buffers.
//! - **Bounded or unbounded**: bounded buffers block publishers when full.
//! - **Discard sweep**: a buffer abandoned by both ends with items queued is
//!   drained after a grace period, so stranded transports never hang teardown.
//!
//! Buffers are created by an [`Environment`](crate::Environment), which fixes
//! whether they are backed by an in-process queue or an inter-process
//! transport. The payload bound [`Payload`] is identical in both flavours so
//! a program compiles unchanged under either.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) mod core;
mod handle;
mod item;
mod subscriber;
pub(crate) mod thread;

pub use handle::{DrainOutcome, Publisher, Subscription};
pub use item::Item;
pub use subscriber::{FnSubscriber, Subscriber};

use crate::error::BufferError;
use crate::wakeup::Wakeup;

/// Bound on every value a buffer can carry.
///
/// Process-flavoured buffers serialise values on enqueue and deserialise on
/// drain; requiring the bound uniformly is what lets the same program switch
/// flavour with one line.
pub trait Payload: Send + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Send + Serialize + DeserializeOwned + 'static {}

/// Queue capacity of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Capacity {
    /// At most this many queued items; publishers block when full.
    /// A bound of zero is treated as one.
    Bounded(usize),
    /// No limit; publishers never block.
    Unbounded,
}

impl Capacity {
    pub(crate) fn limit(self) -> Option<usize> {
        match self {
            Capacity::Bounded(n) => Some(n.max(1)),
            Capacity::Unbounded => None,
        }
    }
}

/// Opaque buffer identity, stable for the buffer's lifetime and unique on the
/// host (the process id is folded in).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BufferId(u64);

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

impl BufferId {
    pub(crate) fn next() -> Self {
        let seq = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        BufferId(((std::process::id() as u64) << 40) | seq)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Self {
        BufferId(raw)
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Backend behind a [`Buffer`] handle: thread-flavoured queue, process host,
/// or process client. Object-safe; serialisation bounds live on the concrete
/// implementations.
pub(crate) trait Backend<T>: Send + Sync {
    fn name(&self) -> String;
    fn id(&self) -> BufferId;
    fn attach_publisher(&self) -> Result<(), BufferError>;
    fn detach_publisher(&self);
    fn attach_subscriber(&self, wakeup: Wakeup) -> Result<(), BufferError>;
    fn detach_subscriber(&self);
    fn push(&self, item: Item<T>, block: bool) -> Result<(), BufferError>;
    fn pop(&self) -> Option<Item<T>>;
    fn len(&self) -> usize;
    fn descriptor(&self) -> Option<crate::process::BufferDescriptor> {
        None
    }
}

/// Handle to a typed FIFO buffer. Cheap to clone; all clones refer to the
/// same underlying queue.
pub struct Buffer<T: Payload> {
    backend: Arc<dyn Backend<T>>,
}

impl<T: Payload> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<T: Payload> Buffer<T> {
    pub(crate) fn from_backend(backend: Arc<dyn Backend<T>>) -> Self {
        Self { backend }
    }

    /// Attaches a new publisher.
    ///
    /// Fails if the discard sweep previously dropped an error completion on
    /// this buffer ([`BufferError::Discarded`]).
    pub fn publish(&self) -> Result<Publisher<T>, BufferError> {
        self.backend.attach_publisher()?;
        Ok(Publisher::new(Arc::clone(&self.backend)))
    }

    /// Attaches the single subscription, bound to `wakeup`.
    ///
    /// Every subsequent publish signals the wakeup. Fails with
    /// [`BufferError::AlreadySubscribed`] while another subscription exists.
    pub fn subscribe(&self, wakeup: &Wakeup) -> Result<Subscription<T>, BufferError> {
        self.backend.attach_subscriber(wakeup.clone())?;
        Ok(Subscription::new(Arc::clone(&self.backend), wakeup.clone()))
    }

    /// The buffer's name, used in logs and errors.
    pub fn name(&self) -> String {
        self.backend.name()
    }

    /// The buffer's opaque identity.
    pub fn id(&self) -> BufferId {
        self.backend.id()
    }

    /// Number of currently queued items.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.backend.len() == 0
    }

    pub(crate) fn descriptor(&self) -> Option<crate::process::BufferDescriptor> {
        self.backend.descriptor()
    }
}

impl<T: Payload> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.backend.name())
            .field("id", &self.backend.id())
            .field("len", &self.backend.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Fault;
    use std::time::Duration;

    fn thread_buffer(capacity: Capacity) -> Buffer<i32> {
        Buffer::from_backend(Arc::new(thread::ThreadBackend::new(
            "unit",
            capacity.limit(),
            Duration::from_secs(5),
            false,
        )))
    }

    struct Collect {
        values: Vec<i32>,
        completion: Option<Option<Fault>>,
    }

    impl Collect {
        fn new() -> Self {
            Self {
                values: Vec::new(),
                completion: None,
            }
        }
    }

    impl Subscriber<i32> for Collect {
        fn on_value(&mut self, value: i32) -> Result<(), Fault> {
            self.values.push(value);
            Ok(())
        }

        fn on_complete(&mut self, error: Option<Fault>) -> Result<(), Fault> {
            self.completion = Some(error);
            Ok(())
        }
    }

    #[test]
    fn values_then_completion_in_order() {
        let buffer = thread_buffer(Capacity::Bounded(4));
        let wakeup = Wakeup::new();
        let mut sub = buffer.subscribe(&wakeup).unwrap();
        let mut publisher = buffer.publish().unwrap();
        for v in [1, 2, 3] {
            publisher.publish_value(v).unwrap();
        }
        publisher.publish_complete(None).unwrap();

        let mut collect = Collect::new();
        let outcome = sub.call_events(&mut collect).unwrap();
        assert_eq!(collect.values, vec![1, 2, 3]);
        assert_eq!(collect.completion, Some(None));
        assert_eq!(outcome.delivered, 3);
        assert!(outcome.completed);
        assert!(sub.is_terminated());
    }

    #[test]
    fn publisher_cannot_publish_after_its_completion() {
        let buffer = thread_buffer(Capacity::Unbounded);
        let mut publisher = buffer.publish().unwrap();
        publisher.publish_complete(None).unwrap();
        let err = publisher.publish_value(1).unwrap_err();
        assert_eq!(err.as_label(), "buffer_complete_already_published");
    }

    #[test]
    fn completion_from_one_publisher_terminates_for_all() {
        let buffer = thread_buffer(Capacity::Unbounded);
        let mut a = buffer.publish().unwrap();
        let mut b = buffer.publish().unwrap();
        a.publish_complete(None).unwrap();
        let err = b.publish_value(1).unwrap_err();
        assert_eq!(err.as_label(), "buffer_completed");
    }

    #[test]
    fn drain_stops_at_completion_marker() {
        let buffer = thread_buffer(Capacity::Unbounded);
        let wakeup = Wakeup::new();
        let mut sub = buffer.subscribe(&wakeup).unwrap();
        {
            let mut a = buffer.publish().unwrap();
            a.publish_value(1).unwrap();
            a.publish_complete(Some(Fault::new("a", "ended"))).unwrap();
        }
        let mut collect = Collect::new();
        let outcome = sub.call_events(&mut collect).unwrap();
        assert_eq!(collect.values, vec![1]);
        assert_eq!(outcome.terminal_error, Some(Fault::new("a", "ended")));
        // Terminated subscriptions drain nothing further.
        let outcome = sub.call_events(&mut collect).unwrap();
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.completed);
    }

    #[test]
    fn drain_consumes_the_wakeup_when_empty() {
        let buffer = thread_buffer(Capacity::Unbounded);
        let wakeup = Wakeup::new();
        let mut sub = buffer.subscribe(&wakeup).unwrap();
        let mut publisher = buffer.publish().unwrap();
        publisher.publish_value(5).unwrap();
        assert!(wakeup.wait(Some(Duration::from_secs(1))));

        let mut collect = Collect::new();
        sub.call_events(&mut collect).unwrap();
        assert_eq!(collect.values, vec![5]);
        assert!(
            !wakeup.wait(Some(Duration::from_millis(20))),
            "no spurious wakeup after a full drain"
        );
    }

    #[test]
    fn subscribe_signals_wakeup_for_preexisting_items() {
        let buffer = thread_buffer(Capacity::Unbounded);
        {
            let mut publisher = buffer.publish().unwrap();
            publisher.publish_value(1).unwrap();
        }
        let wakeup = Wakeup::new();
        let _sub = buffer.subscribe(&wakeup).unwrap();
        assert!(wakeup.wait(Some(Duration::from_secs(1))));
    }

    #[test]
    fn dropping_handles_releases_slots() {
        let buffer = thread_buffer(Capacity::Unbounded);
        let wakeup = Wakeup::new();
        drop(buffer.subscribe(&wakeup).unwrap());
        // The slot is free again.
        let _sub = buffer.subscribe(&wakeup).unwrap();
    }
}
