//! # Worker process entry.
//!
//! A process-flavoured runner re-executes the current program with a
//! [`LaunchSpec`] in the environment. The host program hands control to this
//! module at the top of `main`:
//!
//! ```no_run
//! fn register_workers() {
//!     // puma::register_runnable("stage", stage_builder);
//! }
//!
//! fn main() {
//!     puma::process::worker::init(register_workers);
//!     // normal program follows; worker invocations never reach here
//! }
//! ```
//!
//! Test binaries cannot intercept `main`, so they declare the entry as a
//! libtest target instead with [`enable_process_workers!`](crate::enable_process_workers);
//! workers are then spawned through `--exact puma_process_worker_entry`
//! (use [`Environment::process_for_tests`](crate::Environment::process_for_tests)).

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{client, registry, BufferDescriptor, LAUNCH_ENV};
use crate::funnel::FunnelDescriptor;
use crate::runnable::{Command, Endpoint, SharedEndpoint, StatusMessage, Wiring};
use crate::shared::SharedValueDescriptor;

/// Everything a worker process needs to build and run its runnable.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct LaunchSpec {
    pub(crate) key: String,
    pub(crate) name: String,
    pub(crate) params: serde_json::Value,
    pub(crate) inputs: Vec<(String, BufferDescriptor)>,
    pub(crate) outputs: Vec<(String, BufferDescriptor)>,
    pub(crate) shared: Vec<(String, SharedValueDescriptor)>,
    pub(crate) command: BufferDescriptor,
    pub(crate) status: BufferDescriptor,
    pub(crate) funnel: Option<FunnelDescriptor>,
}

/// Program entry hook. Registers builders (built-ins plus the caller's), and
/// if this process was launched as a worker, runs it and exits.
pub fn init(register: fn()) {
    registry::register_builtins();
    register();
    if std::env::var_os(LAUNCH_ENV).is_some() {
        let code = run_worker();
        std::process::exit(code);
    }
}

/// Body of the libtest entry declared by
/// [`enable_process_workers!`](crate::enable_process_workers). A no-op unless
/// this process was launched as a worker.
pub fn test_entry(register: fn()) {
    if std::env::var_os(LAUNCH_ENV).is_none() {
        return;
    }
    registry::register_builtins();
    register();
    let code = run_worker();
    std::process::exit(code);
}

fn run_worker() -> i32 {
    let raw = match std::env::var(LAUNCH_ENV) {
        Ok(raw) => raw,
        Err(err) => {
            error!(error = %err, "worker launch variable unreadable");
            return 2;
        }
    };
    let launch: LaunchSpec = match serde_json::from_str(&raw) {
        Ok(launch) => launch,
        Err(err) => {
            error!(error = %err, "worker launch spec failed to parse");
            return 2;
        }
    };
    if let Some(funnel) = &launch.funnel {
        crate::funnel::init_child(funnel, &launch.name);
    }
    debug!(worker = %launch.name, key = %launch.key, "worker process starting");

    let mut wiring = Wiring::new(launch.name.clone(), launch.params.clone());
    for (key, descriptor) in &launch.inputs {
        wiring.add_input(key.clone(), Endpoint::Remote(descriptor.clone()));
    }
    for (key, descriptor) in &launch.outputs {
        wiring.add_output(key.clone(), Endpoint::Remote(descriptor.clone()));
    }
    for (key, descriptor) in &launch.shared {
        wiring.add_shared(key.clone(), SharedEndpoint::Remote(descriptor.clone()));
    }
    let command_buffer = client::connect::<Command>(launch.command.clone());
    let status_buffer = client::connect::<StatusMessage>(launch.status.clone());

    crate::runner::thread::worker_main(
        &launch.key,
        wiring,
        command_buffer,
        status_buffer,
        &launch.name,
    );
    0
}

/// Declares the libtest entry through which a test binary's worker processes
/// re-enter. `$register` is a `fn()` performing the test's
/// [`register_runnable`](crate::register_runnable) calls.
#[macro_export]
macro_rules! enable_process_workers {
    ($register:path) => {
        #[test]
        fn puma_process_worker_entry() {
            $crate::process::worker::test_entry($register);
        }
    };
}
