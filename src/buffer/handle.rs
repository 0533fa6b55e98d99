//! # Scoped buffer handles: [`Publisher`] and [`Subscription`].
//!
//! Both ends of a buffer are transient, scoped acquisitions: a handle owns one
//! slot in the buffer's publisher/subscriber count and releases it on drop, on
//! every exit path. The release edges are what arm the discard sweep.

use std::sync::Arc;

use super::{Backend, Payload};
use crate::buffer::item::Item;
use crate::buffer::subscriber::Subscriber;
use crate::error::{BufferError, Fault};
use crate::wakeup::Wakeup;

/// Writing end of a buffer. Obtained from [`Buffer::publish`](crate::Buffer::publish).
///
/// Each publisher may publish any number of values and at most one
/// completion; after its completion, further publishes from the same handle
/// fail with [`BufferError::CompleteAlreadyPublished`].
pub struct Publisher<T: Payload> {
    backend: Arc<dyn Backend<T>>,
    published_complete: bool,
}

impl<T: Payload> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("published_complete", &self.published_complete)
            .finish_non_exhaustive()
    }
}

impl<T: Payload> Publisher<T> {
    pub(crate) fn new(backend: Arc<dyn Backend<T>>) -> Self {
        Self {
            backend,
            published_complete: false,
        }
    }

    /// Appends a value, blocking while a bounded buffer is full.
    pub fn publish_value(&mut self, value: T) -> Result<(), BufferError> {
        self.check_open()?;
        self.backend.push(Item::Value(value), true)
    }

    /// Appends a value without blocking; a full bounded buffer fails with
    /// [`BufferError::Full`].
    pub fn try_publish_value(&mut self, value: T) -> Result<(), BufferError> {
        self.check_open()?;
        self.backend.push(Item::Value(value), false)
    }

    /// Terminates the buffer with an optional error.
    ///
    /// The first completion from any publisher terminates the buffer for all
    /// of them; later publishes fail with [`BufferError::Completed`].
    pub fn publish_complete(&mut self, error: Option<Fault>) -> Result<(), BufferError> {
        self.check_open()?;
        self.backend.push(Item::Complete(error), true)?;
        self.published_complete = true;
        Ok(())
    }

    /// Non-blocking form of [`publish_complete`](Self::publish_complete).
    pub fn try_publish_complete(&mut self, error: Option<Fault>) -> Result<(), BufferError> {
        self.check_open()?;
        self.backend.push(Item::Complete(error), false)?;
        self.published_complete = true;
        Ok(())
    }

    /// Name of the buffer this handle publishes to.
    pub fn buffer_name(&self) -> String {
        self.backend.name()
    }

    fn check_open(&self) -> Result<(), BufferError> {
        if self.published_complete {
            return Err(BufferError::CompleteAlreadyPublished {
                buffer: self.backend.name(),
            });
        }
        Ok(())
    }
}

impl<T: Payload> Drop for Publisher<T> {
    fn drop(&mut self) {
        self.backend.detach_publisher();
    }
}

/// Result of one [`Subscription::call_events`] drain.
#[derive(Debug, Clone, Default)]
pub struct DrainOutcome {
    /// Number of values delivered to the subscriber.
    pub delivered: usize,
    /// Whether the terminal marker has been consumed (now or previously).
    pub completed: bool,
    /// The error of an error-terminated stream, if the terminal marker was
    /// consumed during this drain.
    pub terminal_error: Option<Fault>,
}

/// Reading end of a buffer. Obtained from [`Buffer::subscribe`](crate::Buffer::subscribe).
///
/// Holds the buffer's single subscription slot; dropping it releases the slot.
pub struct Subscription<T: Payload> {
    backend: Arc<dyn Backend<T>>,
    wakeup: Wakeup,
    terminated: bool,
}

impl<T: Payload> Subscription<T> {
    pub(crate) fn new(backend: Arc<dyn Backend<T>>, wakeup: Wakeup) -> Self {
        Self {
            backend,
            wakeup,
            terminated: false,
        }
    }

    /// Drains buffered items without blocking.
    ///
    /// Values are delivered to `subscriber.on_value` in FIFO order until the
    /// queue is empty or the terminal marker is consumed, in which case
    /// `on_complete` is dispatched once and the subscription is terminated.
    /// If the queue is drained empty, the wakeup is consumed before
    /// returning (and the queue re-checked, so a concurrent publish is never
    /// lost).
    ///
    /// A subscriber error aborts the drain and is returned; the loop that
    /// owns the subscription escalates it.
    pub fn call_events(
        &mut self,
        subscriber: &mut dyn Subscriber<T>,
    ) -> Result<DrainOutcome, Fault> {
        let mut outcome = DrainOutcome::default();
        if self.terminated {
            outcome.completed = true;
            return Ok(outcome);
        }
        loop {
            while let Some(item) = self.backend.pop() {
                match item {
                    Item::Value(value) => {
                        outcome.delivered += 1;
                        subscriber.on_value(value)?;
                    }
                    Item::Complete(error) => {
                        self.terminated = true;
                        outcome.completed = true;
                        outcome.terminal_error = error.clone();
                        subscriber.on_complete(error)?;
                        return Ok(outcome);
                    }
                }
            }
            // Queue observed empty: consume the wakeup, then re-check so a
            // publish that landed between the last pop and the consume is
            // picked up in this drain rather than silently deferred.
            self.wakeup.consume();
            if self.backend.len() == 0 {
                return Ok(outcome);
            }
        }
    }

    /// Whether the terminal marker has been consumed.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Name of the buffer this subscription drains.
    pub fn buffer_name(&self) -> String {
        self.backend.name()
    }
}

impl<T: Payload> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.backend.detach_subscriber();
    }
}
