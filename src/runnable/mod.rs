//! # Runnable: user worker logic as a registration table.
//!
//! A [`Runnable`] is built — inside the worker, by a registered builder —
//! from explicit registrations:
//!
//! - [`subscribe`](Runnable::subscribe): an input buffer with the
//!   [`Subscriber`] that handles its items, serviced in registration order;
//! - [`output`](Runnable::output): an output buffer, returning an
//!   [`OutputPort`] the handlers publish through;
//! - [`on_command`](Runnable::on_command): a handler invoked by
//!   [`Command::Invoke`](crate::Command::Invoke) from the parent;
//! - [`on_tick`](Runnable::on_tick): a periodic callback with a monotonic
//!   timestamp.
//!
//! The servicing loop waits on one private wakeup for all inputs plus the
//! command channel, so handlers, command dispatch and ticks are mutually
//! exclusive — the worker is single-threaded.
//!
//! ## Error flow
//! Any handler returning a [`Fault`] terminates the loop; the fault is
//! published as an error completion on every output that has not already been
//! completed, and travels back to the parent over the status channel. An
//! error completion arriving on an input is treated exactly the same way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::buffer::{Buffer, BufferId, Payload, Publisher, Subscriber, Subscription};
use crate::error::{BufferError, Fault};
use crate::wakeup::Wakeup;

mod command;
pub(crate) mod service;
mod spec;
mod status;
mod wiring;

pub use command::Command;
pub use spec::WorkerSpec;
pub use status::StatusMessage;
pub use wiring::Wiring;

pub(crate) use spec::{BufferRef, SharedRef};
pub(crate) use wiring::{Endpoint, SharedEndpoint};

type CommandHandler = Box<dyn FnMut(serde_json::Value) -> Result<(), Fault> + Send>;
type TickHandler = Box<dyn FnMut(f64) -> Result<(), Fault> + Send>;

/// Worker logic assembled from registered inputs, outputs, command handlers
/// and an optional tick callback.
pub struct Runnable {
    name: String,
    pub(crate) inputs: Vec<Box<dyn InputSlot>>,
    pub(crate) outputs: Vec<Box<dyn OutputSlot>>,
    pub(crate) commands: HashMap<String, CommandHandler>,
    pub(crate) tick_handler: Option<TickHandler>,
    pub(crate) tick_interval: Option<f64>,
    pub(crate) ticks_armed: bool,
    registered_buffers: Vec<BufferId>,
}

impl Runnable {
    /// Creates an empty runnable named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            commands: HashMap::new(),
            tick_handler: None,
            tick_interval: None,
            ticks_armed: false,
            registered_buffers: Vec::new(),
        }
    }

    /// The runnable's name, used as the fault origin.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers an input buffer with its subscriber.
    ///
    /// Inputs are serviced in registration order. Registering the same buffer
    /// twice is a wiring mistake and is reported as a fault when the loop
    /// starts.
    pub fn subscribe<T: Payload>(
        &mut self,
        buffer: &Buffer<T>,
        subscriber: impl Subscriber<T> + Send + 'static,
    ) -> &mut Self {
        self.note_buffer(buffer.id());
        self.inputs.push(Box::new(TypedInput {
            buffer: buffer.clone(),
            subscriber: Box::new(subscriber),
            subscription: None,
            completed: false,
        }));
        self
    }

    /// Registers an output buffer and returns the port handlers publish
    /// through.
    ///
    /// The port opens when the loop starts and is completed by the ending
    /// protocol — with the runnable's fault, if it failed.
    pub fn output<T: Payload>(&mut self, buffer: &Buffer<T>) -> OutputPort<T> {
        self.note_buffer(buffer.id());
        let inner = Arc::new(Mutex::new(PortInner {
            publisher: None,
            completed: false,
        }));
        self.outputs.push(Box::new(TypedOutput {
            buffer: buffer.clone(),
            inner: Arc::clone(&inner),
        }));
        OutputPort {
            buffer_name: buffer.name(),
            inner,
        }
    }

    /// Registers a command handler invoked by
    /// [`Command::Invoke`](crate::Command::Invoke) with the given method name.
    pub fn on_command(
        &mut self,
        method: impl Into<String>,
        handler: impl FnMut(serde_json::Value) -> Result<(), Fault> + Send + 'static,
    ) -> &mut Self {
        self.commands.insert(method.into(), Box::new(handler));
        self
    }

    /// Registers the tick callback and arms ticking from loop start.
    ///
    /// The first tick fires one full `interval` after the loop begins; the
    /// parent can pause, resume and retime ticking through its runner.
    pub fn on_tick(
        &mut self,
        interval: Duration,
        handler: impl FnMut(f64) -> Result<(), Fault> + Send + 'static,
    ) -> &mut Self {
        self.tick_interval = Some(interval.as_secs_f64());
        self.tick_handler = Some(Box::new(handler));
        self.ticks_armed = true;
        self
    }

    fn note_buffer(&mut self, id: BufferId) {
        if self.registered_buffers.contains(&id) {
            warn!(runnable = %self.name, buffer = %id, "buffer registered more than once");
        }
        self.registered_buffers.push(id);
    }
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("commands", &self.commands.len())
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

/// Result of servicing one input slot.
pub(crate) enum SlotOutcome {
    /// Nothing left to drain.
    Idle,
    /// The terminal marker was consumed without an error.
    Completed,
    /// A handler failed, or the terminal marker carried an error.
    Fault(Fault),
}

/// One registered input: a buffer, its subscriber, and the live subscription.
pub(crate) trait InputSlot: Send {
    fn buffer_name(&self) -> String;
    fn open(&mut self, wakeup: &Wakeup) -> Result<(), BufferError>;
    fn service(&mut self) -> SlotOutcome;
    fn is_completed(&self) -> bool;
}

struct TypedInput<T: Payload> {
    buffer: Buffer<T>,
    subscriber: Box<dyn Subscriber<T> + Send>,
    subscription: Option<Subscription<T>>,
    completed: bool,
}

impl<T: Payload> InputSlot for TypedInput<T> {
    fn buffer_name(&self) -> String {
        self.buffer.name()
    }

    fn open(&mut self, wakeup: &Wakeup) -> Result<(), BufferError> {
        self.subscription = Some(self.buffer.subscribe(wakeup)?);
        Ok(())
    }

    fn service(&mut self) -> SlotOutcome {
        let Some(subscription) = self.subscription.as_mut() else {
            return SlotOutcome::Idle;
        };
        match subscription.call_events(self.subscriber.as_mut()) {
            Err(fault) => SlotOutcome::Fault(fault),
            Ok(outcome) if outcome.completed => {
                self.completed = true;
                match outcome.terminal_error {
                    Some(fault) => SlotOutcome::Fault(fault),
                    None => SlotOutcome::Completed,
                }
            }
            Ok(_) => SlotOutcome::Idle,
        }
    }

    fn is_completed(&self) -> bool {
        self.completed
    }
}

struct PortInner<T: Payload> {
    publisher: Option<Publisher<T>>,
    completed: bool,
}

/// Publishing handle onto one of a runnable's output buffers.
///
/// The port is only open while the servicing loop runs; publishing outside of
/// that window fails. Clones share the same underlying publisher.
pub struct OutputPort<T: Payload> {
    buffer_name: String,
    inner: Arc<Mutex<PortInner<T>>>,
}

impl<T: Payload> Clone for OutputPort<T> {
    fn clone(&self) -> Self {
        Self {
            buffer_name: self.buffer_name.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Payload> OutputPort<T> {
    /// Publishes a value downstream, blocking while the buffer is full.
    pub fn publish_value(&self, value: T) -> Result<(), Fault> {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        match inner.publisher.as_mut() {
            Some(publisher) => publisher
                .publish_value(value)
                .map_err(|e| e.into_fault(&self.buffer_name)),
            None => Err(self.closed_fault()),
        }
    }

    /// Non-blocking publish; a full bounded buffer fails.
    pub fn try_publish_value(&self, value: T) -> Result<(), Fault> {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        match inner.publisher.as_mut() {
            Some(publisher) => publisher
                .try_publish_value(value)
                .map_err(|e| e.into_fault(&self.buffer_name)),
            None => Err(self.closed_fault()),
        }
    }

    /// Terminates the output early, before the runnable itself ends.
    pub fn publish_complete(&self, error: Option<Fault>) -> Result<(), Fault> {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        match inner.publisher.as_mut() {
            Some(publisher) => {
                publisher
                    .publish_complete(error)
                    .map_err(|e| e.into_fault(&self.buffer_name))?;
                inner.completed = true;
                Ok(())
            }
            None => Err(self.closed_fault()),
        }
    }

    /// Name of the underlying buffer.
    pub fn buffer_name(&self) -> &str {
        &self.buffer_name
    }

    fn closed_fault(&self) -> Fault {
        Fault::new(
            self.buffer_name.clone(),
            "output port is not open (runnable is not executing)",
        )
    }
}

/// One registered output: opened at loop start, completed by the ending
/// protocol, closed on exit.
pub(crate) trait OutputSlot: Send {
    fn buffer_name(&self) -> String;
    fn open(&mut self) -> Result<(), BufferError>;
    fn complete(&mut self, error: Option<Fault>);
    fn close(&mut self);
}

struct TypedOutput<T: Payload> {
    buffer: Buffer<T>,
    inner: Arc<Mutex<PortInner<T>>>,
}

impl<T: Payload> OutputSlot for TypedOutput<T> {
    fn buffer_name(&self) -> String {
        self.buffer.name()
    }

    fn open(&mut self) -> Result<(), BufferError> {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        inner.publisher = Some(self.buffer.publish()?);
        inner.completed = false;
        Ok(())
    }

    fn complete(&mut self, error: Option<Fault>) {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        if inner.completed {
            return;
        }
        if let Some(publisher) = inner.publisher.as_mut() {
            match publisher.try_publish_complete(error) {
                Ok(())
                | Err(BufferError::Completed { .. })
                | Err(BufferError::CompleteAlreadyPublished { .. }) => {}
                Err(err) => {
                    warn!(buffer = %self.buffer.name(), error = %err, "failed to complete output buffer");
                }
            }
        }
        inner.completed = true;
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock().expect("output port lock poisoned");
        inner.publisher = None;
    }
}
