//! # LogFunnel: one ordered log stream for many worker processes.
//!
//! Worker processes cannot share in-process log handlers, and several
//! processes appending to one file corrupt it. The funnel solves both with a
//! single owner:
//!
//! - the application initialises logging once with [`init`] and a
//!   [`LogConfig`];
//! - when the first process-flavoured runner starts, a dedicated
//!   **log-listener worker** is spawned; it alone owns the configured sinks;
//! - every worker process (and the parent) routes its records onto an
//!   inter-process log buffer the listener drains;
//! - when the last process-flavoured runner exits, the listener is torn down
//!   and the parent goes back to writing its sinks directly.
//!
//! Records from one source arrive in order; interleaving between sources is
//! arrival order at the listener. The parent's level configuration is
//! replicated into workers so suppressed records are never enqueued.
//!
//! The funnel's reference count is the only global mutable state in the
//! crate, behind its own lock.

use std::sync::{Arc, Mutex, OnceLock};

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use serde::{Deserialize, Serialize};

use crate::buffer::{Buffer, Capacity};
use crate::config::Config;
use crate::error::RunnerError;
use crate::process::{client, host, BufferDescriptor, ProcessContext};
use crate::runnable::WorkerSpec;

mod config;
mod layer;
mod listener;
mod record;
mod sink;

pub use config::{
    FilterConfig, FormatterConfig, HandlerClass, HandlerConfig, LevelTable, LogConfig,
    LoggerConfig,
};
pub use record::{LogLevel, LogRecord};

use layer::{Route, RouteLayer, SharedRoute};
use sink::SinkSet;

pub(crate) use listener::register as register_listener;

/// What a worker process needs to join the funnel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FunnelDescriptor {
    pub(crate) records: BufferDescriptor,
    pub(crate) filter: LevelTable,
}

struct Active {
    runner: crate::runner::Runner,
    /// Keeps the hosted record buffer alive while the funnel is up.
    #[allow(dead_code)]
    buffer: Buffer<LogRecord>,
    descriptor: FunnelDescriptor,
}

struct FunnelState {
    count: usize,
    active: Option<Active>,
}

static STATE: Mutex<FunnelState> = Mutex::new(FunnelState {
    count: 0,
    active: None,
});
static CONFIG: Mutex<Option<LogConfig>> = Mutex::new(None);
static ROUTE: OnceLock<SharedRoute> = OnceLock::new();

/// Initialises this process's logging with `config` and installs the
/// funnel-aware `tracing` subscriber.
///
/// Call once, early in `main`. Without it the crate still works — worker
/// processes still funnel their records — but the parent's own records are
/// not captured.
pub fn init(config: LogConfig) -> std::io::Result<()> {
    *CONFIG.lock().expect("funnel config lock poisoned") = Some(config.clone());
    let route = Arc::clone(ROUTE.get_or_init(|| {
        Arc::new(Mutex::new(Route::Direct(SinkSet::from_config(&config))))
    }));
    *route.lock().expect("log route lock poisoned") = Route::Direct(SinkSet::from_config(&config));
    let layer = RouteLayer::new(config.level_table(), "main".to_string(), route);
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::AlreadyExists, e.to_string()))
}

fn current_config() -> LogConfig {
    CONFIG
        .lock()
        .expect("funnel config lock poisoned")
        .clone()
        .unwrap_or_else(LogConfig::development)
}

/// Scoped participation of one process runner in the funnel; dropping the
/// guard releases the reference.
pub(crate) struct FunnelGuard(());

impl Drop for FunnelGuard {
    fn drop(&mut self) {
        release();
    }
}

/// Joins the funnel, starting the listener worker on the first call.
pub(crate) fn acquire(
    ctx: &Arc<ProcessContext>,
    cfg: &Config,
) -> Result<(FunnelGuard, FunnelDescriptor), RunnerError> {
    let mut state = STATE.lock().expect("funnel state lock poisoned");
    if state.active.is_none() {
        let config = current_config();
        let buffer: Buffer<LogRecord> = host::bind(
            ctx,
            "puma.log",
            Capacity::Bounded(1024),
            cfg.process_discard_grace,
            false,
        )?;
        let records = buffer
            .descriptor()
            .ok_or_else(|| RunnerError::WrongFlavour {
                name: "log-listener".to_string(),
                resource: "puma.log".to_string(),
            })?;
        let spec = WorkerSpec::new(listener::LISTENER_KEY)
            .named("log-listener")
            .input(listener::RECORDS_KEY, &buffer)
            .params(serde_json::to_value(&config).unwrap_or(serde_json::Value::Null));
        let mut runner = crate::runner::new_process(cfg, ctx, spec, false)?;
        runner.start()?;
        let descriptor = FunnelDescriptor {
            records,
            filter: config.level_table(),
        };
        // Re-route the parent's own records through the listener as well.
        if let Some(route) = ROUTE.get() {
            match buffer.publish() {
                Ok(publisher) => {
                    *route.lock().expect("log route lock poisoned") = Route::Queue(publisher);
                }
                Err(err) => {
                    warn!(error = %err, "cannot route parent records into the funnel");
                }
            }
        }
        state.active = Some(Active {
            runner,
            buffer,
            descriptor,
        });
    }
    state.count += 1;
    let descriptor = state
        .active
        .as_ref()
        .map(|active| active.descriptor.clone())
        .expect("funnel just activated");
    Ok((FunnelGuard(()), descriptor))
}

fn release() {
    let active = {
        let mut state = STATE.lock().expect("funnel state lock poisoned");
        state.count = state.count.saturating_sub(1);
        if state.count > 0 {
            return;
        }
        state.active.take()
    };
    let Some(active) = active else {
        return;
    };
    // Direct routing comes back first so teardown diagnostics still land.
    if let Some(route) = ROUTE.get() {
        *route.lock().expect("log route lock poisoned") =
            Route::Direct(SinkSet::from_config(&current_config()));
    }
    let mut runner = active.runner;
    let _ = runner.stop();
    if let Err(err) = runner.shutdown() {
        warn!(error = %err, "log listener teardown reported an error");
    }
}

/// Installs the queue-routed subscriber inside a worker process.
pub(crate) fn init_child(descriptor: &FunnelDescriptor, source: &str) {
    let buffer: Buffer<LogRecord> = client::connect(descriptor.records.clone());
    match buffer.publish() {
        Ok(publisher) => {
            let route: SharedRoute = Arc::new(Mutex::new(Route::Queue(publisher)));
            let layer = RouteLayer::new(descriptor.filter.clone(), source.to_string(), route);
            let _ = tracing_subscriber::registry().with(layer).try_init();
        }
        Err(err) => {
            eprintln!("puma worker: cannot attach to log funnel: {err}");
        }
    }
}
