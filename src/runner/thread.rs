//! Thread-flavoured worker body.
//!
//! The same body runs in child processes: the process entry resolves its
//! launch spec into a wiring and calls [`worker_main`] on its main thread.
//!
//! The body owns the status publisher for the worker's whole life: it
//! publishes `Started` once the runnable is built, runs the servicing loop,
//! and always terminates the status channel with the outcome — including when
//! the builder or a handler panicked.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::buffer::Buffer;
use crate::error::Fault;
use crate::process::registry;
use crate::runnable::{service, Command, StatusMessage};
use crate::runnable::Wiring;

pub(crate) fn worker_main(
    key: &str,
    wiring: Wiring,
    command_buffer: Buffer<Command>,
    status_buffer: Buffer<StatusMessage>,
    runner_name: &str,
) {
    let mut status_pub = match status_buffer.publish() {
        Ok(publisher) => publisher,
        Err(err) => {
            warn!(runner = runner_name, error = %err, "cannot attach to status channel; aborting worker");
            return;
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), Fault> {
        let builder = registry::lookup(key).ok_or_else(|| {
            Fault::new(
                runner_name,
                format!("no runnable registered under key '{key}'"),
            )
        })?;
        let runnable = builder(&wiring)?;
        if let Err(err) = status_pub.try_publish_value(StatusMessage::Started) {
            warn!(runner = runner_name, error = %err, "failed to report Started");
        }
        debug!(runner = runner_name, "entering servicing loop");
        service::run(runnable, command_buffer)
    }));

    let fault = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some(fault),
        Err(payload) => Some(Fault::new(runner_name, panic_message(payload.as_ref()))),
    };
    match &fault {
        None => debug!(runner = runner_name, "worker finished cleanly"),
        Some(fault) => warn!(runner = runner_name, %fault, "worker finished with fault"),
    }
    // Status publishes never block: a stuck parent must not wedge the worker.
    if let Err(err) = status_pub.try_publish_complete(fault) {
        warn!(runner = runner_name, error = %err, "failed to publish worker outcome");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}
