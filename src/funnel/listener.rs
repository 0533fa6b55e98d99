//! The log-listener worker: the single owner of the configured sinks.

use tracing::debug;

use super::config::LogConfig;
use super::record::LogRecord;
use super::sink::SinkSet;
use crate::buffer::Subscriber;
use crate::error::Fault;
use crate::process::registry::register_runnable;
use crate::runnable::{Runnable, Wiring};

/// Registry key of the built-in log listener.
pub(crate) const LISTENER_KEY: &str = "puma.log_listener";

/// Wiring key of the record buffer.
pub(crate) const RECORDS_KEY: &str = "records";

pub(crate) fn register() {
    register_runnable(LISTENER_KEY, build);
}

fn build(wiring: &Wiring) -> Result<Runnable, Fault> {
    let config: LogConfig = wiring.params()?;
    // The listener owns the sinks; its own records go straight to them.
    let _ = super::init(config.clone());
    let records = wiring.input::<LogRecord>(RECORDS_KEY)?;
    let mut runnable = Runnable::new(wiring.worker_name());
    runnable.subscribe(
        &records,
        SinkWriter {
            sinks: SinkSet::from_config(&config),
        },
    );
    debug!("log listener configured");
    Ok(runnable)
}

struct SinkWriter {
    sinks: SinkSet,
}

impl Subscriber<LogRecord> for SinkWriter {
    fn on_value(&mut self, record: LogRecord) -> Result<(), Fault> {
        self.sinks.dispatch(&record);
        Ok(())
    }
}
