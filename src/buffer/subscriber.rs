//! # Subscriber: the consuming side's event callbacks.
//!
//! A [`Subscriber`] receives the items drained from one buffer:
//! [`on_value`](Subscriber::on_value) once per payload, then
//! [`on_complete`](Subscriber::on_complete) at most once when the terminal
//! marker is consumed. Both return `Result` — an `Err` escalates into the
//! servicing loop, terminates the runnable, and is forwarded downstream as an
//! error completion.
//!
//! The same subscriber value may be registered for several buffers; the
//! servicing loop never invokes two callbacks concurrently.

use crate::error::Fault;

/// Callbacks invoked by [`Subscription::call_events`](crate::Subscription::call_events).
pub trait Subscriber<T> {
    /// Called once per drained value, in FIFO order.
    fn on_value(&mut self, value: T) -> Result<(), Fault>;

    /// Called when the terminal marker is drained. `error` carries the fault
    /// of an error-terminated stream.
    fn on_complete(&mut self, error: Option<Fault>) -> Result<(), Fault> {
        let _ = error;
        Ok(())
    }
}

/// Adapter building a [`Subscriber`] from closures.
///
/// ```
/// use puma::{FnSubscriber, Subscriber};
///
/// let mut seen = Vec::new();
/// let mut sub = FnSubscriber::new(move |v: u32| {
///     seen.push(v);
///     Ok(())
/// });
/// sub.on_value(7).unwrap();
/// ```
pub struct FnSubscriber<T> {
    on_value: Box<dyn FnMut(T) -> Result<(), Fault> + Send>,
    on_complete: Box<dyn FnMut(Option<Fault>) -> Result<(), Fault> + Send>,
}

impl<T> FnSubscriber<T> {
    /// Creates a subscriber from a value callback; completions are ignored.
    pub fn new(on_value: impl FnMut(T) -> Result<(), Fault> + Send + 'static) -> Self {
        Self {
            on_value: Box::new(on_value),
            on_complete: Box::new(|_| Ok(())),
        }
    }

    /// Replaces the completion callback.
    pub fn with_on_complete(
        mut self,
        on_complete: impl FnMut(Option<Fault>) -> Result<(), Fault> + Send + 'static,
    ) -> Self {
        self.on_complete = Box::new(on_complete);
        self
    }
}

impl<T> Subscriber<T> for FnSubscriber<T> {
    fn on_value(&mut self, value: T) -> Result<(), Fault> {
        (self.on_value)(value)
    }

    fn on_complete(&mut self, error: Option<Fault>) -> Result<(), Fault> {
        (self.on_complete)(error)
    }
}
