//! # Runner: the lifecycle shell around a worker.
//!
//! A [`Runner`] owns one worker (thread or child process), the command
//! channel into it and the status channel out of it. It never runs user code
//! itself — it spawns, observes and tears down.
//!
//! ## State machine
//!
//! | From     | Event                    | To       |
//! |----------|--------------------------|----------|
//! | Created  | `start()`                | Starting |
//! | Starting | worker reports `Started` | Running  |
//! | Running  | `stop()` / teardown      | Stopping |
//! | Running  | worker reports a fault   | Failed   |
//! | Stopping | worker exits cleanly     | Stopped  |
//! | Stopping | worker exits with fault  | Failed   |
//!
//! ## Error polling contract
//! Callers poll [`check_for_errors`](Runner::check_for_errors) on the parent
//! side; a worker fault is returned there once. Teardown re-surfaces any
//! fault nobody polled — the scoped exit is a safety net, not the contract.
//!
//! ## Teardown
//! Dropping a runner (or calling [`shutdown`](Runner::shutdown), which
//! additionally returns the outcome) performs, in order: stop if still
//! running, join with the configured grace, forcible termination on overrun
//! (process flavour: kill; thread flavour: the stop flag is the only abort,
//! the overrun is reported), release of the channel endpoints so discard
//! sweeps can run, and surfacing of any outstanding status fault.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::buffer::{Buffer, Publisher, Subscriber, Subscription};
use crate::config::Config;
use crate::error::{Fault, RunnerError};
use crate::funnel::{self, FunnelGuard};
use crate::process::ProcessContext;
use crate::runnable::{Command, StatusMessage, WorkerSpec};
use crate::wakeup::Wakeup;

pub(crate) mod process;
pub(crate) mod thread;

/// Lifecycle state of a [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Constructed, not yet started.
    Created,
    /// Worker spawned, `Started` not yet observed.
    Starting,
    /// Worker confirmed running.
    Running,
    /// Stop issued, waiting for the worker to exit.
    Stopping,
    /// Worker exited cleanly and was joined.
    Stopped,
    /// Worker reported a fault, or teardown had to force-terminate it.
    Failed,
}

pub(crate) enum SpawnPlan {
    Thread {
        wiring: crate::runnable::Wiring,
    },
    Process {
        launch: crate::process::worker::LaunchSpec,
        ctx: Arc<ProcessContext>,
        with_funnel: bool,
    },
}

enum WorkerHandle {
    Thread(std::thread::JoinHandle<()>),
    Process(std::process::Child),
}

#[derive(Default)]
struct StatusProbe {
    started: bool,
}

impl Subscriber<StatusMessage> for StatusProbe {
    fn on_value(&mut self, value: StatusMessage) -> Result<(), Fault> {
        match value {
            StatusMessage::Started => self.started = true,
        }
        Ok(())
    }
}

/// Lifecycle shell executing one worker.
pub struct Runner {
    name: String,
    key: String,
    state: RunnerState,
    cfg: Config,
    command_buffer: Buffer<Command>,
    status_buffer: Buffer<StatusMessage>,
    command_pub: Option<Publisher<Command>>,
    status_sub: Option<Subscription<StatusMessage>>,
    status_wakeup: Wakeup,
    probe: StatusProbe,
    finished: bool,
    fault: Option<Fault>,
    plan: Option<SpawnPlan>,
    worker: Option<WorkerHandle>,
    funnel_guard: Option<FunnelGuard>,
    torn_down: bool,
}

impl Runner {
    pub(crate) fn assemble(
        cfg: &Config,
        spec_key: String,
        name: String,
        command_buffer: Buffer<Command>,
        status_buffer: Buffer<StatusMessage>,
        plan: SpawnPlan,
    ) -> Result<Self, RunnerError> {
        let command_pub = command_buffer.publish()?;
        let status_wakeup = Wakeup::new();
        let status_sub = status_buffer.subscribe(&status_wakeup)?;
        Ok(Self {
            name,
            key: spec_key,
            state: RunnerState::Created,
            cfg: cfg.clone(),
            command_buffer,
            status_buffer,
            command_pub: Some(command_pub),
            status_sub: Some(status_sub),
            status_wakeup,
            probe: StatusProbe::default(),
            finished: false,
            fault: None,
            plan: Some(plan),
            worker: None,
            funnel_guard: None,
            torn_down: false,
        })
    }

    /// The runner's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Spawns the worker. The runnable is built inside the worker by its
    /// registered builder.
    pub fn start(&mut self) -> Result<(), RunnerError> {
        if self.state != RunnerState::Created {
            return Err(RunnerError::AlreadyStarted {
                name: self.name.clone(),
            });
        }
        let plan = self.plan.take().ok_or_else(|| RunnerError::AlreadyStarted {
            name: self.name.clone(),
        })?;
        match plan {
            SpawnPlan::Thread { wiring } => {
                let key = self.key.clone();
                let name = self.name.clone();
                let command_buffer = self.command_buffer.clone();
                let status_buffer = self.status_buffer.clone();
                let handle = std::thread::Builder::new()
                    .name(self.name.clone())
                    .spawn(move || {
                        thread::worker_main(&key, wiring, command_buffer, status_buffer, &name)
                    })
                    .map_err(|e| RunnerError::Spawn {
                        name: self.name.clone(),
                        source: e,
                    })?;
                self.worker = Some(WorkerHandle::Thread(handle));
            }
            SpawnPlan::Process {
                mut launch,
                ctx,
                with_funnel,
            } => {
                if with_funnel {
                    let (guard, descriptor) = funnel::acquire(&ctx, &self.cfg)?;
                    launch.funnel = Some(descriptor);
                    self.funnel_guard = Some(guard);
                }
                let child =
                    process::spawn_worker(&ctx, &launch).map_err(|e| RunnerError::Spawn {
                        name: self.name.clone(),
                        source: e,
                    })?;
                self.worker = Some(WorkerHandle::Process(child));
            }
        }
        debug!(runner = %self.name, "worker spawned");
        self.state = RunnerState::Starting;
        Ok(())
    }

    /// Starts the worker and blocks until it reports `Started`.
    pub fn start_blocking(&mut self) -> Result<(), RunnerError> {
        self.start()?;
        let timeout = self.cfg.start_timeout;
        self.wait_until_running(timeout)
    }

    /// Blocks until the worker has reported `Started` (or exited cleanly
    /// before the report was observed).
    pub fn wait_until_running(&mut self, timeout: Duration) -> Result<(), RunnerError> {
        if self.state == RunnerState::Created {
            return Err(RunnerError::NotStarted {
                name: self.name.clone(),
            });
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_status();
            if let Some(fault) = self.fault.take() {
                self.state = RunnerState::Failed;
                return Err(RunnerError::Worker(fault));
            }
            if self.probe.started {
                if self.state == RunnerState::Starting {
                    self.state = RunnerState::Running;
                }
                return Ok(());
            }
            if self.finished {
                // Ran to completion before the report was drained.
                self.state = RunnerState::Stopped;
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RunnerError::StartTimeout {
                    name: self.name.clone(),
                    timeout,
                });
            }
            self.status_wakeup.wait(Some(remaining));
        }
    }

    /// Issues the cooperative stop command.
    pub fn stop(&mut self) -> Result<(), RunnerError> {
        match self.state {
            RunnerState::Created => Err(RunnerError::NotStarted {
                name: self.name.clone(),
            }),
            RunnerState::Stopping | RunnerState::Stopped | RunnerState::Failed => Ok(()),
            RunnerState::Starting | RunnerState::Running => {
                if let Some(publisher) = self.command_pub.as_mut() {
                    if let Err(err) = publisher.try_publish_value(Command::Stop) {
                        warn!(runner = %self.name, error = %err, "failed to enqueue stop command");
                    }
                }
                self.state = RunnerState::Stopping;
                Ok(())
            }
        }
    }

    /// Dispatches a registered command handler on the worker.
    ///
    /// Returns once the command is enqueued; there is no in-band result.
    pub fn invoke(
        &mut self,
        method: impl Into<String>,
        args: serde_json::Value,
    ) -> Result<(), RunnerError> {
        self.send_command(Command::Invoke {
            method: method.into(),
            args,
        })
    }

    /// Disarms the worker's ticking.
    pub fn pause_ticks(&mut self) -> Result<(), RunnerError> {
        self.send_command(Command::PauseTicks)
    }

    /// Arms the worker's ticking; the first tick fires one interval later.
    pub fn resume_ticks(&mut self) -> Result<(), RunnerError> {
        self.send_command(Command::ResumeTicks)
    }

    /// Changes the tick interval from the next boundary on.
    pub fn set_tick_interval(&mut self, interval: Duration) -> Result<(), RunnerError> {
        self.send_command(Command::SetTickInterval {
            seconds: interval.as_secs_f64(),
        })
    }

    /// Polls the status channel and returns a worker fault, once, if one has
    /// been reported.
    pub fn check_for_errors(&mut self) -> Result<(), RunnerError> {
        self.drain_status();
        if self.probe.started && self.state == RunnerState::Starting {
            self.state = RunnerState::Running;
        }
        if let Some(fault) = self.fault.take() {
            self.state = RunnerState::Failed;
            return Err(RunnerError::Worker(fault));
        }
        Ok(())
    }

    /// Blocks until the worker has exited, up to `timeout`.
    ///
    /// On overrun the worker is force-terminated where possible (process
    /// flavour) and [`RunnerError::GraceExceeded`] is returned.
    pub fn join(&mut self, timeout: Duration) -> Result<(), RunnerError> {
        let deadline = Instant::now() + timeout;
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker {
            WorkerHandle::Thread(handle) => {
                loop {
                    self.drain_status();
                    if self.finished {
                        break;
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        // Threads cannot be killed; the stop flag is the only
                        // abort. Report the overrun and detach.
                        self.state = RunnerState::Failed;
                        return Err(RunnerError::GraceExceeded {
                            name: self.name.clone(),
                            grace: timeout,
                        });
                    }
                    self.status_wakeup
                        .wait(Some(remaining.min(Duration::from_millis(100))));
                }
                if handle.join().is_err() {
                    warn!(runner = %self.name, "worker thread panicked during join");
                }
            }
            WorkerHandle::Process(mut child) => loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        if !status.success() {
                            debug!(runner = %self.name, %status, "worker process exited non-zero");
                        }
                        break;
                    }
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            let _ = child.kill();
                            let _ = child.wait();
                            self.state = RunnerState::Failed;
                            self.drain_status();
                            return Err(RunnerError::GraceExceeded {
                                name: self.name.clone(),
                                grace: timeout,
                            });
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(err) => {
                        warn!(runner = %self.name, error = %err, "failed to poll worker process");
                        break;
                    }
                }
            },
        }
        self.drain_status();
        if self.fault.is_some() {
            self.state = RunnerState::Failed;
        } else if matches!(
            self.state,
            RunnerState::Starting | RunnerState::Running | RunnerState::Stopping
        ) {
            self.state = RunnerState::Stopped;
        }
        Ok(())
    }

    /// Explicit scoped teardown, returning what `Drop` would only log:
    /// a grace overrun or a worker fault nobody polled.
    pub fn shutdown(mut self) -> Result<(), RunnerError> {
        self.teardown()
    }

    fn send_command(&mut self, command: Command) -> Result<(), RunnerError> {
        if !matches!(self.state, RunnerState::Starting | RunnerState::Running) {
            return Err(RunnerError::NotStarted {
                name: self.name.clone(),
            });
        }
        let publisher = self
            .command_pub
            .as_mut()
            .ok_or_else(|| RunnerError::NotStarted {
                name: self.name.clone(),
            })?;
        publisher.try_publish_value(command)?;
        Ok(())
    }

    fn drain_status(&mut self) {
        let Some(subscription) = self.status_sub.as_mut() else {
            return;
        };
        if let Ok(outcome) = subscription.call_events(&mut self.probe) {
            if outcome.completed {
                self.finished = true;
                if let Some(fault) = outcome.terminal_error {
                    if self.fault.is_none() {
                        self.fault = Some(fault);
                    }
                }
            }
        }
    }

    fn teardown(&mut self) -> Result<(), RunnerError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        if matches!(self.state, RunnerState::Starting | RunnerState::Running) {
            let _ = self.stop();
        }
        let grace = self.cfg.join_grace;
        let join_result = self.join(grace);
        // Release the channel endpoints so discard sweeps can reclaim them.
        self.command_pub = None;
        self.drain_status();
        self.status_sub = None;
        let fault = self.fault.take();
        self.funnel_guard = None;
        join_result?;
        if let Some(fault) = fault {
            self.state = RunnerState::Failed;
            return Err(RunnerError::Worker(fault));
        }
        Ok(())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!(runner = %self.name, error = %err, "runner teardown surfaced an unobserved error");
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish()
    }
}

/// Builds a thread-flavoured runner for `spec`.
pub(crate) fn new_thread(cfg: &Config, spec: WorkerSpec) -> Result<Runner, RunnerError> {
    use crate::buffer::thread::ThreadBackend;
    use crate::runnable::{Endpoint, SharedEndpoint, Wiring};

    let name = spec.name.clone();
    let command_buffer: Buffer<Command> = Buffer::from_backend(Arc::new(ThreadBackend::new(
        &format!("{name}.command"),
        Some(cfg.control_capacity),
        cfg.thread_discard_grace,
        false,
    )));
    let status_buffer: Buffer<StatusMessage> = Buffer::from_backend(Arc::new(ThreadBackend::new(
        &format!("{name}.status"),
        Some(cfg.control_capacity),
        cfg.thread_discard_grace,
        false,
    )));

    let mut wiring = Wiring::new(spec.name.clone(), spec.params);
    for (key, buffer_ref) in spec.inputs {
        wiring.add_input(key, Endpoint::Local(buffer_ref.local));
    }
    for (key, buffer_ref) in spec.outputs {
        wiring.add_output(key, Endpoint::Local(buffer_ref.local));
    }
    for (key, shared_ref) in spec.shared {
        wiring.add_shared(key, SharedEndpoint::Local(shared_ref.local));
    }

    Runner::assemble(
        cfg,
        spec.key,
        name,
        command_buffer,
        status_buffer,
        SpawnPlan::Thread { wiring },
    )
}

/// Builds a process-flavoured runner for `spec`. `with_funnel` is cleared
/// only for the log listener itself.
pub(crate) fn new_process(
    cfg: &Config,
    ctx: &Arc<ProcessContext>,
    spec: WorkerSpec,
    with_funnel: bool,
) -> Result<Runner, RunnerError> {
    use crate::process::host;
    use crate::process::worker::LaunchSpec;

    let name = spec.name.clone();
    let command_buffer: Buffer<Command> = host::bind(
        ctx,
        &format!("{name}.command"),
        crate::buffer::Capacity::Bounded(cfg.control_capacity),
        cfg.process_discard_grace,
        false,
    )?;
    let status_buffer: Buffer<StatusMessage> = host::bind(
        ctx,
        &format!("{name}.status"),
        crate::buffer::Capacity::Bounded(cfg.control_capacity),
        cfg.process_discard_grace,
        false,
    )?;

    let descriptor_of = |resource: &str,
                         descriptor: Option<crate::process::BufferDescriptor>|
     -> Result<crate::process::BufferDescriptor, RunnerError> {
        descriptor.ok_or_else(|| RunnerError::WrongFlavour {
            name: name.clone(),
            resource: resource.to_string(),
        })
    };

    let mut launch = LaunchSpec {
        key: spec.key.clone(),
        name: name.clone(),
        params: spec.params,
        inputs: Vec::new(),
        outputs: Vec::new(),
        shared: Vec::new(),
        command: descriptor_of("command", command_buffer.descriptor())?,
        status: descriptor_of("status", status_buffer.descriptor())?,
        funnel: None,
    };
    for (key, buffer_ref) in &spec.inputs {
        launch
            .inputs
            .push((key.clone(), descriptor_of(key, buffer_ref.descriptor.clone())?));
    }
    for (key, buffer_ref) in &spec.outputs {
        launch
            .outputs
            .push((key.clone(), descriptor_of(key, buffer_ref.descriptor.clone())?));
    }
    for (key, shared_ref) in &spec.shared {
        let descriptor = shared_ref
            .descriptor
            .clone()
            .ok_or_else(|| RunnerError::WrongFlavour {
                name: name.clone(),
                resource: key.clone(),
            })?;
        launch.shared.push((key.clone(), descriptor));
    }

    Runner::assemble(
        cfg,
        spec.key,
        name,
        command_buffer,
        status_buffer,
        SpawnPlan::Process {
            launch,
            ctx: Arc::clone(ctx),
            with_funnel,
        },
    )
}
