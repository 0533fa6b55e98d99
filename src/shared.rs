//! # SharedValue: flavour-matched cross-worker state.
//!
//! Buffers are the sanctioned channel for user *data*; a [`SharedValue`] is
//! the escape hatch for small cross-worker *state* (counters, settings,
//! flags).
//!
//! - Thread flavour: the value sits behind a mutex.
//! - Process flavour: the value lives with its creating process, which serves
//!   get/set requests over a socket — a manager-mediated object. Workers
//!   receive a descriptor through their wiring and connect lazily.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::Payload;
use crate::error::{BufferError, Fault};
use crate::process::wire::{self, Frame};
use crate::process::ProcessContext;

/// Connection details for a process-flavoured shared value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SharedValueDescriptor {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) path: PathBuf,
}

/// A value readable and writable from any worker of the program.
pub struct SharedValue<T: Payload + Clone> {
    name: String,
    inner: Inner<T>,
}

enum Inner<T: Payload + Clone> {
    Local {
        value: Arc<Mutex<T>>,
        server: Option<Arc<Server>>,
        descriptor: Option<SharedValueDescriptor>,
    },
    Remote {
        descriptor: SharedValueDescriptor,
        connection: Arc<Mutex<Option<UnixStream>>>,
    },
}

impl<T: Payload + Clone> Clone for SharedValue<T> {
    fn clone(&self) -> Self {
        let inner = match &self.inner {
            Inner::Local {
                value,
                server,
                descriptor,
            } => Inner::Local {
                value: Arc::clone(value),
                server: server.clone(),
                descriptor: descriptor.clone(),
            },
            Inner::Remote {
                descriptor,
                connection,
            } => Inner::Remote {
                descriptor: descriptor.clone(),
                connection: Arc::clone(connection),
            },
        };
        Self {
            name: self.name.clone(),
            inner,
        }
    }
}

impl<T: Payload + Clone> SharedValue<T> {
    /// Thread-flavoured value: a mutex in this process.
    pub(crate) fn local(name: &str, initial: T) -> Self {
        Self {
            name: name.to_string(),
            inner: Inner::Local {
                value: Arc::new(Mutex::new(initial)),
                server: None,
                descriptor: None,
            },
        }
    }

    /// Process-flavoured value: the mutex plus a socket server mediating
    /// remote access.
    pub(crate) fn host(
        ctx: &Arc<ProcessContext>,
        name: &str,
        initial: T,
    ) -> Result<Self, BufferError> {
        let id = rand::random::<u64>();
        let path = ctx.socket_path("val", id);
        let listener = UnixListener::bind(&path).map_err(|e| BufferError::Transport {
            buffer: name.to_string(),
            message: e.to_string(),
        })?;
        let value = Arc::new(Mutex::new(initial));
        let shutdown = Arc::new(AtomicBool::new(false));
        {
            let value = Arc::clone(&value);
            let shutdown = Arc::clone(&shutdown);
            let value_name = name.to_string();
            std::thread::Builder::new()
                .name(format!("val-host:{name}"))
                .spawn(move || serve::<T>(listener, value, shutdown, value_name))
                .map_err(|e| BufferError::Transport {
                    buffer: name.to_string(),
                    message: e.to_string(),
                })?;
        }
        let descriptor = SharedValueDescriptor {
            id,
            name: name.to_string(),
            path: path.clone(),
        };
        Ok(Self {
            name: name.to_string(),
            inner: Inner::Local {
                value,
                server: Some(Arc::new(Server { path, shutdown })),
                descriptor: Some(descriptor),
            },
        })
    }

    /// Worker-side handle resolved from a descriptor.
    pub(crate) fn connect(descriptor: SharedValueDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            inner: Inner::Remote {
                descriptor,
                connection: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub(crate) fn descriptor(&self) -> Option<SharedValueDescriptor> {
        match &self.inner {
            Inner::Local { descriptor, .. } => descriptor.clone(),
            Inner::Remote { descriptor, .. } => Some(descriptor.clone()),
        }
    }

    /// Reads the current value.
    pub fn get(&self) -> Result<T, Fault> {
        match &self.inner {
            Inner::Local { value, .. } => {
                Ok(value.lock().expect("shared value lock poisoned").clone())
            }
            Inner::Remote { .. } => match self.request(Frame::Get)? {
                Frame::Value(value) => serde_json::from_value(value)
                    .map_err(|e| Fault::new(self.name.clone(), format!("bad value payload: {e}"))),
                other => Err(Fault::new(
                    self.name.clone(),
                    format!("unexpected response {other:?}"),
                )),
            },
        }
    }

    /// Replaces the value.
    pub fn set(&self, new_value: T) -> Result<(), Fault> {
        match &self.inner {
            Inner::Local { value, .. } => {
                *value.lock().expect("shared value lock poisoned") = new_value;
                Ok(())
            }
            Inner::Remote { .. } => {
                let payload = serde_json::to_value(&new_value)
                    .map_err(|e| Fault::new(self.name.clone(), e.to_string()))?;
                match self.request(Frame::Set(payload))? {
                    Frame::Ack => Ok(()),
                    other => Err(Fault::new(
                        self.name.clone(),
                        format!("unexpected response {other:?}"),
                    )),
                }
            }
        }
    }

    fn request(&self, frame: Frame) -> Result<Frame, Fault> {
        let Inner::Remote {
            descriptor,
            connection,
        } = &self.inner
        else {
            return Err(Fault::new(self.name.clone(), "not a remote shared value"));
        };
        let mut guard = connection.lock().expect("shared value lock poisoned");
        if guard.is_none() {
            let stream = UnixStream::connect(&descriptor.path)
                .map_err(|e| Fault::new(self.name.clone(), e.to_string()))?;
            wire::write_frame(
                &mut &stream,
                &Frame::AttachShared {
                    value: descriptor.id,
                },
            )
            .map_err(|e| Fault::new(self.name.clone(), e.to_string()))?;
            *guard = Some(stream);
        }
        let stream = guard.as_ref().expect("connection just established");
        let result = wire::write_frame(&mut &*stream, &frame)
            .and_then(|_| wire::read_frame(&mut &*stream));
        match result {
            Ok(frame) => Ok(frame),
            Err(err) => {
                // Drop the broken connection so the next call reconnects.
                *guard = None;
                Err(Fault::new(self.name.clone(), err.to_string()))
            }
        }
    }
}

struct Server {
    path: PathBuf,
    shutdown: Arc<AtomicBool>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = UnixStream::connect(&self.path);
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve<T: Payload + Clone>(
    listener: UnixListener,
    value: Arc<Mutex<T>>,
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
                warn!(value = %name, error = %err, "shared value accept failed");
                break;
            }
        };
        let value = Arc::clone(&value);
        let name = name.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("val-conn:{name}"))
            .spawn(move || serve_client(stream, value, name));
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn shared value connection thread");
        }
    }
    debug!(value = %name, "shared value server stopped");
}

fn serve_client<T: Payload + Clone>(stream: UnixStream, value: Arc<Mutex<T>>, name: String) {
    match wire::read_frame(&mut &stream) {
        Ok(Frame::AttachShared { .. }) => {}
        _ => return,
    }
    loop {
        let request = match wire::read_frame(&mut &stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        let response = match request {
            Frame::Get => {
                let snapshot = value.lock().expect("shared value lock poisoned").clone();
                match serde_json::to_value(&snapshot) {
                    Ok(payload) => Frame::Value(payload),
                    Err(err) => Frame::Reject {
                        label: "shared_value_serialise".to_string(),
                        message: err.to_string(),
                        fault: None,
                    },
                }
            }
            Frame::Set(payload) => match serde_json::from_value::<T>(payload) {
                Ok(new_value) => {
                    *value.lock().expect("shared value lock poisoned") = new_value;
                    Frame::Ack
                }
                Err(err) => Frame::Reject {
                    label: "shared_value_deserialise".to_string(),
                    message: err.to_string(),
                    fault: None,
                },
            },
            Frame::Detach => return,
            other => {
                warn!(value = %name, frame = ?other, "unexpected shared value request");
                return;
            }
        };
        if wire::write_frame(&mut &stream, &response).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_get_set_round_trip() {
        let value = SharedValue::local("counter", 41i64);
        assert_eq!(value.get().unwrap(), 41);
        value.set(42).unwrap();
        assert_eq!(value.get().unwrap(), 42);
        // Clones observe the same state.
        let clone = value.clone();
        clone.set(7).unwrap();
        assert_eq!(value.get().unwrap(), 7);
    }
}
