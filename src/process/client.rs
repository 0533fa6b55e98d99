//! Remote side of a process-flavoured buffer.
//!
//! Workers resolve buffer descriptors into client-backed [`Buffer`] handles.
//! Connections are opened lazily per role:
//!
//! - all local publishers share one publisher connection (the host counts the
//!   connection as one publisher slot; local handle counts are folded in);
//! - the subscription opens a subscriber connection whose reader relays
//!   frames into a local queue and signals the subscriber's wakeup, so
//!   selection across many buffers works exactly as in the thread flavour.
//!
//! A transport failure on the subscriber path is synthesised into an
//! error-terminated completion, so the servicing loop observes it as a fatal
//! inbound error rather than hanging.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::wire::{self, Frame};
use super::BufferDescriptor;
use crate::buffer::{Backend, Buffer, BufferId, Item, Payload};
use crate::error::{BufferError, Fault};
use crate::wakeup::Wakeup;

/// Builds a client-backed buffer handle from a descriptor. Connections are
/// opened on first attach.
pub(crate) fn connect<T: Payload>(descriptor: BufferDescriptor) -> Buffer<T> {
    Buffer::from_backend(Arc::new(ClientBackend::<T> {
        descriptor,
        publisher: Mutex::new(PublisherState {
            stream: None,
            handles: 0,
        }),
        buffer_completed: Arc::new(AtomicBool::new(false)),
        subscriber: Mutex::new(None),
        queue: Arc::new(Mutex::new(VecDeque::new())),
    }))
}

struct PublisherState {
    stream: Option<UnixStream>,
    /// Local publisher handles sharing the connection.
    handles: usize,
}

struct SubscriberState {
    stream: UnixStream,
    detached: Arc<AtomicBool>,
}

pub(crate) struct ClientBackend<T: Payload> {
    descriptor: BufferDescriptor,
    publisher: Mutex<PublisherState>,
    /// Set when the host notifies that the buffer has terminated.
    buffer_completed: Arc<AtomicBool>,
    subscriber: Mutex<Option<SubscriberState>>,
    /// Local relay queue filled by the subscriber reader thread.
    queue: Arc<Mutex<VecDeque<Item<T>>>>,
}

impl<T: Payload> ClientBackend<T> {
    fn transport(&self, err: impl std::fmt::Display) -> BufferError {
        BufferError::Transport {
            buffer: self.descriptor.name.clone(),
            message: err.to_string(),
        }
    }

    /// Opens a connection, sends the hello frame, and waits for the ack.
    fn open(&self, hello: Frame) -> Result<UnixStream, BufferError> {
        let stream =
            UnixStream::connect(&self.descriptor.path).map_err(|e| self.transport(e))?;
        wire::write_frame(&mut &stream, &hello).map_err(|e| self.transport(e))?;
        match wire::read_frame(&mut &stream).map_err(|e| self.transport(e))? {
            Frame::Ack => Ok(stream),
            Frame::Reject {
                label,
                message,
                fault,
            } => Err(self.rejection(&label, message, fault)),
            other => Err(self.transport(format!("unexpected hello response {other:?}"))),
        }
    }

    fn rejection(&self, label: &str, message: String, fault: Option<Fault>) -> BufferError {
        let buffer = self.descriptor.name.clone();
        match (label, fault) {
            ("buffer_already_subscribed", _) => BufferError::AlreadySubscribed { buffer },
            ("buffer_discarded_error", Some(fault)) => BufferError::Discarded { buffer, fault },
            _ => BufferError::Transport {
                buffer,
                message,
            },
        }
    }
}

impl<T: Payload> Backend<T> for ClientBackend<T> {
    fn name(&self) -> String {
        self.descriptor.name.clone()
    }

    fn id(&self) -> BufferId {
        BufferId::from_raw(self.descriptor.id)
    }

    fn attach_publisher(&self) -> Result<(), BufferError> {
        let mut state = self.publisher.lock().expect("client lock poisoned");
        if state.stream.is_none() {
            let stream = self.open(Frame::AttachPublisher {
                buffer: self.descriptor.id,
            })?;
            // Watch for the host's Completed notice on the same connection.
            if let Ok(notices) = stream.try_clone() {
                let completed = Arc::clone(&self.buffer_completed);
                let name = self.descriptor.name.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("buf-pub-ntc:{name}"))
                    .spawn(move || loop {
                        match wire::read_frame(&mut &notices) {
                            Ok(Frame::Completed) => completed.store(true, Ordering::SeqCst),
                            Ok(_) => continue,
                            Err(_) => break,
                        }
                    });
                if let Err(err) = spawned {
                    warn!(buffer = %name, error = %err, "failed to spawn notice reader");
                }
            }
            state.stream = Some(stream);
        }
        state.handles += 1;
        Ok(())
    }

    fn detach_publisher(&self) {
        let mut state = self.publisher.lock().expect("client lock poisoned");
        state.handles = state.handles.saturating_sub(1);
        if state.handles == 0 {
            if let Some(stream) = state.stream.take() {
                let _ = wire::write_frame(&mut &stream, &Frame::Detach);
                debug!(buffer = %self.descriptor.name, "publisher connection closed");
            }
        }
    }

    fn attach_subscriber(&self, wakeup: Wakeup) -> Result<(), BufferError> {
        let mut state = self.subscriber.lock().expect("client lock poisoned");
        if state.is_some() {
            return Err(BufferError::AlreadySubscribed {
                buffer: self.descriptor.name.clone(),
            });
        }
        let stream = self.open(Frame::AttachSubscriber {
            buffer: self.descriptor.id,
        })?;
        let detached = Arc::new(AtomicBool::new(false));
        let reader = stream.try_clone().map_err(|e| self.transport(e))?;
        {
            let queue = Arc::clone(&self.queue);
            let detached = Arc::clone(&detached);
            let name = self.descriptor.name.clone();
            std::thread::Builder::new()
                .name(format!("buf-sub-rx:{name}"))
                .spawn(move || relay_frames(reader, queue, wakeup, detached, name))
                .map_err(|e| self.transport(e))?;
        }
        *state = Some(SubscriberState { stream, detached });
        Ok(())
    }

    fn detach_subscriber(&self) {
        let mut state = self.subscriber.lock().expect("client lock poisoned");
        if let Some(sub) = state.take() {
            sub.detached.store(true, Ordering::SeqCst);
            let _ = wire::write_frame(&mut &sub.stream, &Frame::Detach);
            let _ = sub.stream.shutdown(std::net::Shutdown::Both);
            self.queue.lock().expect("client lock poisoned").clear();
        }
    }

    fn push(&self, item: Item<T>, _block: bool) -> Result<(), BufferError> {
        let state = self.publisher.lock().expect("client lock poisoned");
        if self.buffer_completed.load(Ordering::SeqCst) {
            return Err(BufferError::Completed {
                buffer: self.descriptor.name.clone(),
            });
        }
        let stream = state.stream.as_ref().ok_or_else(|| {
            self.transport("publish without an open publisher connection")
        })?;
        let frame = match item {
            Item::Value(value) => {
                Frame::Value(serde_json::to_value(&value).map_err(|e| self.transport(e))?)
            }
            Item::Complete(error) => Frame::Complete(error),
        };
        // Blocking semantics ride on the socket: the host stops reading while
        // its bounded queue is full, so this write blocks in turn.
        wire::write_frame(&mut &*stream, &frame).map_err(|e| self.transport(e))
    }

    fn pop(&self) -> Option<Item<T>> {
        self.queue.lock().expect("client lock poisoned").pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().expect("client lock poisoned").len()
    }

    fn descriptor(&self) -> Option<BufferDescriptor> {
        Some(self.descriptor.clone())
    }
}

fn relay_frames<T: Payload>(
    stream: UnixStream,
    queue: Arc<Mutex<VecDeque<Item<T>>>>,
    wakeup: Wakeup,
    detached: Arc<AtomicBool>,
    name: String,
) {
    loop {
        let frame = match wire::read_frame(&mut &stream) {
            Ok(frame) => frame,
            Err(err) => {
                if !detached.load(Ordering::SeqCst) {
                    // The transport died under an active subscription: surface
                    // it as an error-terminated completion.
                    let fault = Fault::new(&name, format!("subscriber transport failed: {err}"));
                    queue
                        .lock()
                        .expect("client lock poisoned")
                        .push_back(Item::Complete(Some(fault)));
                    wakeup.signal();
                }
                return;
            }
        };
        let item = match frame {
            Frame::Value(value) => match serde_json::from_value::<T>(value) {
                Ok(value) => Item::Value(value),
                Err(err) => {
                    let fault = Fault::new(&name, format!("payload type mismatch: {err}"));
                    Item::Complete(Some(fault))
                }
            },
            Frame::Complete(error) => Item::Complete(error),
            other => {
                warn!(buffer = %name, frame = ?other, "unexpected frame on subscriber connection");
                continue;
            }
        };
        let terminal = item.is_complete();
        queue.lock().expect("client lock poisoned").push_back(item);
        wakeup.signal();
        if terminal {
            return;
        }
    }
}
