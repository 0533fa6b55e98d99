//! Hosting side of a process-flavoured buffer.
//!
//! The creating process owns the authoritative [`Core`] and a Unix socket
//! listener. Local handles operate on the core directly; each remote
//! connection is relayed by a dedicated thread:
//!
//! - a remote *publisher* connection attaches one publisher slot and pushes
//!   incoming values into the core — a full bounded queue blocks the relay,
//!   the socket fills, and the remote write blocks, which is the
//!   cross-process rendition of the blocking publish;
//! - the remote *subscriber* connection takes the subscription slot and is
//!   fed by a relay that pops from the core and streams frames out.
//!
//! Late values arriving after the buffer terminated are answered with a
//! `Completed` notice instead of data loss going unnoticed.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::wire::{self, Frame};
use super::{BufferDescriptor, ProcessContext};
use crate::buffer::core::Core;
use crate::buffer::{Backend, Buffer, BufferId, Capacity, Item, Payload};
use crate::error::BufferError;
use crate::wakeup::Wakeup;

/// Creates a hosted buffer bound to a socket under the context's directory.
pub(crate) fn bind<T: Payload>(
    ctx: &Arc<ProcessContext>,
    name: &str,
    capacity: Capacity,
    grace: Duration,
    warn_on_discard: bool,
) -> Result<Buffer<T>, BufferError> {
    let id = BufferId::next();
    let path = ctx.socket_path("buf", id.raw());
    let listener = UnixListener::bind(&path).map_err(|e| BufferError::Transport {
        buffer: name.to_string(),
        message: e.to_string(),
    })?;
    let core = Core::new(name, id, capacity.limit(), grace, warn_on_discard);
    let descriptor = BufferDescriptor {
        id: id.raw(),
        name: name.to_string(),
        path: path.clone(),
        capacity,
        payload_type: std::any::type_name::<T>().to_string(),
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let core = Arc::clone(&core);
        let shutdown = Arc::clone(&shutdown);
        let name = name.to_string();
        std::thread::Builder::new()
            .name(format!("buf-host:{name}"))
            .spawn(move || accept_loop(listener, core, shutdown, name))
            .map_err(|e| BufferError::Transport {
                buffer: descriptor.name.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(Buffer::from_backend(Arc::new(HostBackend {
        core,
        descriptor,
        shutdown,
        path,
    })))
}

pub(crate) struct HostBackend<T: Payload> {
    core: Arc<Core<T>>,
    descriptor: BufferDescriptor,
    shutdown: Arc<AtomicBool>,
    path: PathBuf,
}

impl<T: Payload> Backend<T> for HostBackend<T> {
    fn name(&self) -> String {
        self.descriptor.name.clone()
    }

    fn id(&self) -> BufferId {
        self.core.id()
    }

    fn attach_publisher(&self) -> Result<(), BufferError> {
        self.core.attach_publisher()
    }

    fn detach_publisher(&self) {
        self.core.detach_publisher();
    }

    fn attach_subscriber(&self, wakeup: Wakeup) -> Result<(), BufferError> {
        self.core.attach_subscriber(wakeup)
    }

    fn detach_subscriber(&self) {
        self.core.detach_subscriber();
    }

    fn push(&self, item: Item<T>, block: bool) -> Result<(), BufferError> {
        self.core.push(item, block)
    }

    fn pop(&self) -> Option<Item<T>> {
        self.core.pop()
    }

    fn len(&self) -> usize {
        self.core.len()
    }

    fn descriptor(&self) -> Option<BufferDescriptor> {
        Some(self.descriptor.clone())
    }
}

impl<T: Payload> Drop for HostBackend<T> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the acceptor with a throwaway connection, then let it exit.
        let _ = UnixStream::connect(&self.path);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn accept_loop<T: Payload>(
    listener: UnixListener,
    core: Arc<Core<T>>,
    shutdown: Arc<AtomicBool>,
    name: String,
) {
    for connection in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let stream = match connection {
            Ok(stream) => stream,
            Err(err) => {
                warn!(buffer = %name, error = %err, "buffer listener accept failed");
                break;
            }
        };
        let core = Arc::clone(&core);
        let name = name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("buf-conn:{name}"))
            .spawn(move || serve_connection(stream, core, name));
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn buffer connection thread");
        }
    }
    debug!(buffer = %name, "buffer listener stopped");
}

fn serve_connection<T: Payload>(stream: UnixStream, core: Arc<Core<T>>, name: String) {
    let hello = match wire::read_frame(&mut &stream) {
        Ok(frame) => frame,
        Err(_) => return,
    };
    match hello {
        Frame::AttachPublisher { .. } => serve_publisher(stream, core, name),
        Frame::AttachSubscriber { .. } => serve_subscriber(stream, core, name),
        other => {
            warn!(buffer = %name, frame = ?other, "unexpected hello frame");
        }
    }
}

fn reject(stream: &UnixStream, err: &BufferError) {
    let fault = match err {
        BufferError::Discarded { fault, .. } => Some(fault.clone()),
        _ => None,
    };
    let _ = wire::write_frame(
        &mut &*stream,
        &Frame::Reject {
            label: err.as_label().to_string(),
            message: err.to_string(),
            fault,
        },
    );
}

fn serve_publisher<T: Payload>(stream: UnixStream, core: Arc<Core<T>>, name: String) {
    if let Err(err) = core.attach_publisher() {
        reject(&stream, &err);
        return;
    }
    if wire::write_frame(&mut &stream, &Frame::Ack).is_err() {
        core.detach_publisher();
        return;
    }
    let mut notified_completed = false;
    loop {
        let frame = match wire::read_frame(&mut &stream) {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let item = match frame {
            Frame::Value(value) => match serde_json::from_value::<T>(value) {
                Ok(value) => Item::Value(value),
                Err(err) => {
                    warn!(buffer = %name, error = %err, "dropping remote value that failed to deserialise");
                    break;
                }
            },
            Frame::Complete(error) => Item::Complete(error),
            Frame::Detach => break,
            other => {
                warn!(buffer = %name, frame = ?other, "unexpected frame from remote publisher");
                break;
            }
        };
        match core.push(item, true) {
            Ok(()) => {}
            Err(BufferError::Completed { .. }) => {
                if !notified_completed {
                    let _ = wire::write_frame(&mut &stream, &Frame::Completed);
                    notified_completed = true;
                }
            }
            Err(err) => {
                warn!(buffer = %name, error = %err, "remote publish rejected");
                break;
            }
        }
    }
    core.detach_publisher();
    debug!(buffer = %name, "remote publisher disconnected");
}

fn serve_subscriber<T: Payload>(stream: UnixStream, core: Arc<Core<T>>, name: String) {
    let relay = Wakeup::new();
    if let Err(err) = core.attach_subscriber(relay.clone()) {
        reject(&stream, &err);
        return;
    }
    if wire::write_frame(&mut &stream, &Frame::Ack).is_err() {
        core.detach_subscriber();
        return;
    }
    let closed = Arc::new(AtomicBool::new(false));
    // Control reader: notices the peer detaching or dying and wakes the relay.
    if let Ok(control) = stream.try_clone() {
        let closed_thread = Arc::clone(&closed);
        let relay = relay.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("buf-sub-ctl:{name}"))
            .spawn(move || {
                loop {
                    match wire::read_frame(&mut &control) {
                        Ok(Frame::Detach) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
                closed_thread.store(true, Ordering::SeqCst);
                relay.signal();
            });
        if spawned.is_err() {
            closed.store(true, Ordering::SeqCst);
        }
    } else {
        closed.store(true, Ordering::SeqCst);
    }

    'feed: while !closed.load(Ordering::SeqCst) {
        while let Some(item) = core.pop() {
            let (frame, terminal) = match item {
                Item::Value(value) => match serde_json::to_value(&value) {
                    Ok(value) => (Frame::Value(value), false),
                    Err(err) => {
                        warn!(buffer = %name, error = %err, "failed to serialise value for remote subscriber");
                        break 'feed;
                    }
                },
                Item::Complete(error) => (Frame::Complete(error), true),
            };
            if wire::write_frame(&mut &stream, &frame).is_err() {
                break 'feed;
            }
            if terminal {
                break 'feed;
            }
        }
        relay.consume();
        if core.len() == 0 {
            relay.wait(Some(Duration::from_millis(500)));
        }
    }
    core.detach_subscriber();
    debug!(buffer = %name, "remote subscriber disconnected");
}
