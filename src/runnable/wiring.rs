//! # Wiring: what a builder receives to construct its runnable.
//!
//! A [`Wiring`] resolves the names declared in a
//! [`WorkerSpec`](crate::WorkerSpec) into typed handles, wherever the worker
//! runs. In the thread flavour the endpoints are the original in-process
//! buffers; in the process flavour they are descriptors that resolve into
//! socket-backed client buffers inside the child.

use std::any::Any;

use serde::de::DeserializeOwned;

use crate::buffer::{Buffer, Payload};
use crate::error::Fault;
use crate::process::{client, BufferDescriptor};
use crate::shared::{SharedValue, SharedValueDescriptor};

pub(crate) enum Endpoint {
    /// The buffer lives in this process; the box holds a `Buffer<T>`.
    Local(Box<dyn Any + Send>),
    /// The buffer is hosted elsewhere and reached over its socket.
    Remote(BufferDescriptor),
}

pub(crate) enum SharedEndpoint {
    Local(Box<dyn Any + Send>),
    Remote(SharedValueDescriptor),
}

/// Typed access to the buffers, shared values and parameters a worker was
/// launched with.
pub struct Wiring {
    name: String,
    params: serde_json::Value,
    inputs: Vec<(String, Endpoint)>,
    outputs: Vec<(String, Endpoint)>,
    shared: Vec<(String, SharedEndpoint)>,
}

impl Wiring {
    pub(crate) fn new(name: String, params: serde_json::Value) -> Self {
        Self {
            name,
            params,
            inputs: Vec::new(),
            outputs: Vec::new(),
            shared: Vec::new(),
        }
    }

    pub(crate) fn add_input(&mut self, key: String, endpoint: Endpoint) {
        self.inputs.push((key, endpoint));
    }

    pub(crate) fn add_output(&mut self, key: String, endpoint: Endpoint) {
        self.outputs.push((key, endpoint));
    }

    pub(crate) fn add_shared(&mut self, key: String, endpoint: SharedEndpoint) {
        self.shared.push((key, endpoint));
    }

    /// The worker name from the spec, typically used as the runnable name.
    pub fn worker_name(&self) -> &str {
        &self.name
    }

    /// Deserialises the launch parameters.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P, Fault> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| Fault::new(self.name.clone(), format!("invalid params: {e}")))
    }

    /// Resolves the input buffer registered under `key`.
    pub fn input<T: Payload>(&self, key: &str) -> Result<Buffer<T>, Fault> {
        resolve(&self.inputs, key, &self.name, "input")
    }

    /// Resolves the output buffer registered under `key`.
    pub fn output<T: Payload>(&self, key: &str) -> Result<Buffer<T>, Fault> {
        resolve(&self.outputs, key, &self.name, "output")
    }

    /// Output keys in declaration order.
    pub fn output_keys(&self) -> Vec<String> {
        self.outputs.iter().map(|(key, _)| key.clone()).collect()
    }

    /// Resolves the shared value registered under `key`.
    pub fn shared<T: Payload + Clone>(&self, key: &str) -> Result<SharedValue<T>, Fault> {
        let entry = self
            .shared
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, endpoint)| endpoint)
            .ok_or_else(|| {
                Fault::new(
                    self.name.clone(),
                    format!("no shared value wired under key '{key}'"),
                )
            })?;
        match entry {
            SharedEndpoint::Local(any) => any
                .downcast_ref::<SharedValue<T>>()
                .cloned()
                .ok_or_else(|| {
                    Fault::new(
                        self.name.clone(),
                        format!("shared value '{key}' has a different payload type"),
                    )
                }),
            SharedEndpoint::Remote(descriptor) => Ok(SharedValue::connect(descriptor.clone())),
        }
    }
}

fn resolve<T: Payload>(
    entries: &[(String, Endpoint)],
    key: &str,
    worker: &str,
    role: &str,
) -> Result<Buffer<T>, Fault> {
    let endpoint = entries
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, endpoint)| endpoint)
        .ok_or_else(|| Fault::new(worker, format!("no {role} buffer wired under key '{key}'")))?;
    match endpoint {
        Endpoint::Local(any) => any.downcast_ref::<Buffer<T>>().cloned().ok_or_else(|| {
            Fault::new(
                worker,
                format!("{role} buffer '{key}' has a different payload type"),
            )
        }),
        Endpoint::Remote(descriptor) => Ok(client::connect(descriptor.clone())),
    }
}
