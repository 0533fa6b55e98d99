//! # WorkerSpec: declaring a worker before it exists.
//!
//! A [`WorkerSpec`] names a registered builder and wires named buffers and
//! shared values to it. The spec is flavour-agnostic: the thread environment
//! hands the builder the in-process handles, the process environment ships
//! descriptors to the child. Parameters are snapshot at spawn time as JSON.
//!
//! ```no_run
//! use puma::{Capacity, Environment, WorkerSpec};
//! # fn builder(w: &puma::Wiring) -> Result<puma::Runnable, puma::Fault> {
//! #     Ok(puma::Runnable::new(w.worker_name()))
//! # }
//!
//! puma::register_runnable("doubler", builder);
//! let env = Environment::thread();
//! let input = env.create_buffer::<i32>("in", Capacity::Bounded(16)).unwrap();
//! let output = env.create_buffer::<i32>("out", Capacity::Bounded(16)).unwrap();
//!
//! let spec = WorkerSpec::new("doubler")
//!     .input("in", &input)
//!     .output("out", &output)
//!     .params(serde_json::json!({ "factor": 2 }));
//! let runner = env.create_runner(spec).unwrap();
//! ```

use std::any::Any;

use crate::buffer::{Buffer, Payload};
use crate::process::BufferDescriptor;
use crate::shared::{SharedValue, SharedValueDescriptor};

pub(crate) struct BufferRef {
    pub(crate) local: Box<dyn Any + Send>,
    pub(crate) descriptor: Option<BufferDescriptor>,
}

pub(crate) struct SharedRef {
    pub(crate) local: Box<dyn Any + Send>,
    pub(crate) descriptor: Option<SharedValueDescriptor>,
}

/// Declaration of a worker: registry key, parameters, and named wiring.
pub struct WorkerSpec {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) params: serde_json::Value,
    pub(crate) inputs: Vec<(String, BufferRef)>,
    pub(crate) outputs: Vec<(String, BufferRef)>,
    pub(crate) shared: Vec<(String, SharedRef)>,
}

impl WorkerSpec {
    /// Creates a spec for the builder registered under `key`. The worker name
    /// defaults to the key.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            params: serde_json::Value::Null,
            inputs: Vec::new(),
            outputs: Vec::new(),
            shared: Vec::new(),
        }
    }

    /// Overrides the worker name used in logs, errors and thread names.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attaches launch parameters, snapshot at spawn time.
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Wires `buffer` as an input available to the builder under `key`.
    pub fn input<T: Payload>(mut self, key: &str, buffer: &Buffer<T>) -> Self {
        self.inputs.push((key.to_string(), buffer_ref(buffer)));
        self
    }

    /// Wires `buffer` as an output available to the builder under `key`.
    pub fn output<T: Payload>(mut self, key: &str, buffer: &Buffer<T>) -> Self {
        self.outputs.push((key.to_string(), buffer_ref(buffer)));
        self
    }

    /// Wires a shared value available to the builder under `key`.
    pub fn shared_value<T: Payload + Clone>(mut self, key: &str, value: &SharedValue<T>) -> Self {
        self.shared.push((
            key.to_string(),
            SharedRef {
                local: Box::new(value.clone()),
                descriptor: value.descriptor(),
            },
        ));
        self
    }
}

fn buffer_ref<T: Payload>(buffer: &Buffer<T>) -> BufferRef {
    BufferRef {
        local: Box::new(buffer.clone()),
        descriptor: buffer.descriptor(),
    }
}
