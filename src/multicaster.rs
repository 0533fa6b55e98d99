//! # Multicaster: one input fanned out to N outputs.
//!
//! A multicaster worker subscribes to a single buffer and republishes every
//! value to all of its output buffers. Completion — clean or with an error —
//! is forwarded to every output by the servicing loop's ending protocol. A
//! failure publishing to one output does not stop the attempts on the
//! others; the accumulated failures terminate the worker and surface on its
//! status channel.
//!
//! Fan-out requires cloning, so the payload additionally needs `Clone`.
//! Because workers are built from the registry, the application registers the
//! multicaster once per payload type:
//!
//! ```no_run
//! use puma::{multicaster, Capacity, Environment};
//!
//! fn register_workers() {
//!     multicaster::register::<i64>("fanout-i64");
//! }
//!
//! # fn main() {
//! register_workers();
//! let env = Environment::thread();
//! let input = env.create_buffer::<i64>("in", Capacity::Bounded(16)).unwrap();
//! let a = env.create_buffer::<i64>("a", Capacity::Bounded(16)).unwrap();
//! let b = env.create_buffer::<i64>("b", Capacity::Bounded(16)).unwrap();
//! let mut runner = env
//!     .create_runner(multicaster::spec("fanout-i64", &input, &[&a, &b]))
//!     .unwrap();
//! runner.start().unwrap();
//! # }
//! ```

use crate::buffer::{Buffer, Payload, Subscriber};
use crate::error::Fault;
use crate::process::registry::register_runnable;
use crate::runnable::{OutputPort, Runnable, Wiring, WorkerSpec};

/// Wiring key of the multicaster's input buffer.
pub const INPUT_KEY: &str = "input";

/// Registers the multicaster builder for payload type `T` under `key`.
pub fn register<T: Payload + Clone>(key: &str) {
    register_runnable(key, build::<T>);
}

/// Builds the spec wiring `input` to every buffer in `outputs`.
pub fn spec<T: Payload>(key: &str, input: &Buffer<T>, outputs: &[&Buffer<T>]) -> WorkerSpec {
    let mut spec = WorkerSpec::new(key)
        .named(format!("multicaster:{}", input.name()))
        .input(INPUT_KEY, input);
    for (index, output) in outputs.iter().enumerate() {
        spec = spec.output(&format!("out{index}"), output);
    }
    spec
}

fn build<T: Payload + Clone>(wiring: &Wiring) -> Result<Runnable, Fault> {
    let input = wiring.input::<T>(INPUT_KEY)?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let mut ports = Vec::new();
    for key in wiring.output_keys() {
        let output = wiring.output::<T>(&key)?;
        ports.push(runnable.output(&output));
    }
    runnable.subscribe(&input, Fanout { ports });
    Ok(runnable)
}

struct Fanout<T: Payload + Clone> {
    ports: Vec<OutputPort<T>>,
}

impl<T: Payload + Clone> Subscriber<T> for Fanout<T> {
    fn on_value(&mut self, value: T) -> Result<(), Fault> {
        let mut failures: Vec<Fault> = Vec::new();
        for port in &self.ports {
            if let Err(fault) = port.publish_value(value.clone()) {
                failures.push(fault);
            }
        }
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => {
                let summary = failures
                    .iter()
                    .map(|fault| fault.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(Fault::new("multicaster", summary))
            }
        }
    }
}
