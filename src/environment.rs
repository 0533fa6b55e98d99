//! # Environment: the one knob between threads and processes.
//!
//! An [`Environment`] is the factory a program obtains every buffer, runner,
//! wakeup and shared value from. Its flavour — fixed at construction —
//! decides the substrate for all of them:
//!
//! - **Thread**: buffers back onto in-process queues, runners onto OS
//!   threads, shared values onto a mutex.
//! - **Process**: buffers back onto socket-relayed queues with serialisation
//!   at the boundary, runners onto child processes, shared values onto a
//!   manager socket owned by the creating process.
//!
//! The contracts are identical, which is what lets an application switch
//! flavour by changing one line:
//!
//! ```no_run
//! use puma::Environment;
//!
//! let env = Environment::thread();
//! // let env = Environment::process().unwrap();
//! ```

use std::sync::Arc;

use crate::buffer::{thread::ThreadBackend, Buffer, Capacity, Payload};
use crate::config::Config;
use crate::error::{BufferError, RunnerError};
use crate::process::{host, ProcessContext};
use crate::runnable::WorkerSpec;
use crate::runner::{self, Runner};
use crate::shared::SharedValue;
use crate::wakeup::Wakeup;

/// Execution substrate of an [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavour {
    /// Workers are OS threads sharing the address space.
    Thread,
    /// Workers are isolated child processes.
    Process,
}

#[derive(Clone)]
enum Substrate {
    Thread,
    Process(Arc<ProcessContext>),
}

/// Process-wide factory fixing the execution flavour.
#[derive(Clone)]
pub struct Environment {
    substrate: Substrate,
    cfg: Config,
}

impl Environment {
    /// Creates a thread-flavoured environment with default configuration.
    pub fn thread() -> Self {
        Self::thread_with(Config::default())
    }

    /// Creates a thread-flavoured environment with an explicit configuration.
    pub fn thread_with(cfg: Config) -> Self {
        Self {
            substrate: Substrate::Thread,
            cfg,
        }
    }

    /// Creates a process-flavoured environment with default configuration.
    ///
    /// Workers re-execute the current program; the host's `main` must call
    /// [`process::worker::init`](crate::process::worker::init).
    pub fn process() -> std::io::Result<Self> {
        Self::process_with(Config::default())
    }

    /// Creates a process-flavoured environment with an explicit configuration.
    pub fn process_with(cfg: Config) -> std::io::Result<Self> {
        Ok(Self {
            substrate: Substrate::Process(ProcessContext::new(false)?),
            cfg,
        })
    }

    /// Process-flavoured environment for use inside a test binary: workers
    /// are spawned through the libtest entry declared by
    /// [`enable_process_workers!`](crate::enable_process_workers).
    pub fn process_for_tests() -> std::io::Result<Self> {
        let mut cfg = Config::default();
        cfg.start_timeout = std::time::Duration::from_secs(60);
        Ok(Self {
            substrate: Substrate::Process(ProcessContext::new(true)?),
            cfg,
        })
    }

    /// The environment's flavour.
    pub fn flavour(&self) -> Flavour {
        match self.substrate {
            Substrate::Thread => Flavour::Thread,
            Substrate::Process(_) => Flavour::Process,
        }
    }

    /// The configuration applied to everything this environment creates.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Creates a selection wakeup. The same primitive serves both flavours;
    /// cross-process buffers signal the relay endpoint inside the
    /// subscriber's process.
    pub fn create_wakeup(&self) -> Wakeup {
        Wakeup::new()
    }

    /// Creates a buffer named `name` with the given capacity.
    pub fn create_buffer<T: Payload>(
        &self,
        name: &str,
        capacity: Capacity,
    ) -> Result<Buffer<T>, BufferError> {
        match &self.substrate {
            Substrate::Thread => Ok(Buffer::from_backend(Arc::new(ThreadBackend::new(
                name,
                capacity.limit(),
                self.cfg.thread_discard_grace,
                true,
            )))),
            Substrate::Process(ctx) => host::bind(
                ctx,
                name,
                capacity,
                self.cfg.process_discard_grace,
                true,
            ),
        }
    }

    /// Creates the runner described by `spec`.
    ///
    /// The runnable itself is built by the registered builder inside the
    /// worker once [`Runner::start`] is called.
    pub fn create_runner(&self, spec: WorkerSpec) -> Result<Runner, RunnerError> {
        crate::process::registry::register_builtins();
        match &self.substrate {
            Substrate::Thread => runner::new_thread(&self.cfg, spec),
            Substrate::Process(ctx) => runner::new_process(&self.cfg, ctx, spec, true),
        }
    }

    /// Creates a shared value initialised to `initial`.
    pub fn create_shared_value<T: Payload + Clone>(
        &self,
        name: &str,
        initial: T,
    ) -> Result<SharedValue<T>, BufferError> {
        match &self.substrate {
            Substrate::Thread => Ok(SharedValue::local(name, initial)),
            Substrate::Process(ctx) => SharedValue::host(ctx, name, initial),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("flavour", &self.flavour())
            .finish()
    }
}
