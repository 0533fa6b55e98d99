//! # Error types used by the runtime, buffers and runners.
//!
//! Three layers of failure are kept apart:
//!
//! - [`Fault`] — the structured error that travels *through* the dataflow:
//!   carried by terminal `Complete` markers, stored as a runnable's error
//!   state, and reported over status channels. It must survive a process
//!   boundary, so it is a plain serialisable value rather than a trait object.
//! - [`BufferError`] — protocol misuse or transport failure on a single
//!   buffer, surfaced synchronously to the caller.
//! - [`RunnerError`] — failures of the lifecycle shell around a worker.
//!
//! All types provide `as_label()` returning a short stable snake_case string
//! for logs and metrics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error propagated through the dataflow graph.
///
/// A `Fault` is what arrives as the payload of an error-terminated completion,
/// and what `Runner::check_for_errors` hands back to the parent. `origin`
/// names the runnable, buffer or subsystem that raised it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{origin}: {message}")]
pub struct Fault {
    /// Name of the runnable, buffer or subsystem that raised the error.
    pub origin: String,
    /// Human-readable description.
    pub message: String,
}

impl Fault {
    /// Creates a fault raised by `origin`.
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Wraps an arbitrary error, keeping only its display form.
    pub fn from_error(origin: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self::new(origin, error.to_string())
    }
}

/// # Errors raised by buffer operations.
///
/// Protocol variants (`AlreadySubscribed`, `Completed`, `CompleteAlreadyPublished`,
/// `Full`) are API misuse or expected boundary conditions and stay local to the
/// caller. `Discarded` re-surfaces an error completion that the discard sweep
/// had to drop. `Transport` wraps I/O failures of process-flavoured buffers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BufferError {
    /// A second subscription was attempted while one is active.
    #[error("buffer '{buffer}' is already subscribed to")]
    AlreadySubscribed {
        /// Buffer name.
        buffer: String,
    },
    /// A publish was attempted after the buffer was terminated.
    #[error("buffer '{buffer}' has already been completed")]
    Completed {
        /// Buffer name.
        buffer: String,
    },
    /// A publisher tried to publish `Complete` twice.
    #[error("buffer '{buffer}': this publisher has already published Complete")]
    CompleteAlreadyPublished {
        /// Buffer name.
        buffer: String,
    },
    /// Non-blocking publish on a bounded buffer that is full.
    #[error("buffer '{buffer}' is full")]
    Full {
        /// Buffer name.
        buffer: String,
    },
    /// The discard sweep dropped an error completion; it is re-raised on the
    /// next attach so it is never silently lost.
    #[error("buffer '{buffer}' discarded an error completion: {fault}")]
    Discarded {
        /// Buffer name.
        buffer: String,
        /// The error carried by the discarded completion.
        fault: Fault,
    },
    /// I/O failure in the inter-process transport backing the buffer.
    #[error("buffer '{buffer}' transport failure: {message}")]
    Transport {
        /// Buffer name.
        buffer: String,
        /// Description of the underlying I/O failure.
        message: String,
    },
}

impl BufferError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BufferError::AlreadySubscribed { .. } => "buffer_already_subscribed",
            BufferError::Completed { .. } => "buffer_completed",
            BufferError::CompleteAlreadyPublished { .. } => "buffer_complete_already_published",
            BufferError::Full { .. } => "buffer_full",
            BufferError::Discarded { .. } => "buffer_discarded_error",
            BufferError::Transport { .. } => "buffer_transport",
        }
    }

    /// Converts the error into a [`Fault`] attributable to `origin`, for
    /// forwarding into the dataflow.
    pub fn into_fault(self, origin: &str) -> Fault {
        Fault::new(origin, self.to_string())
    }
}

/// # Errors produced by the runner lifecycle shell.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunnerError {
    /// `start()` was called twice.
    #[error("runner '{name}' has already been started")]
    AlreadyStarted {
        /// Runner name.
        name: String,
    },
    /// An operation requiring a running worker was called before `start()`.
    #[error("runner '{name}' has not been started")]
    NotStarted {
        /// Runner name.
        name: String,
    },
    /// The worker did not report `Started` within the allowed time.
    #[error("runner '{name}' failed to start within {timeout:?}")]
    StartTimeout {
        /// Runner name.
        name: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },
    /// Teardown join exceeded the grace period; the worker was force-terminated.
    #[error("runner '{name}': shutdown grace {grace:?} exceeded; forcing termination")]
    GraceExceeded {
        /// Runner name.
        name: String,
        /// The configured grace duration.
        grace: Duration,
    },
    /// The OS failed to spawn the worker thread or process.
    #[error("runner '{name}': failed to spawn worker: {source}")]
    Spawn {
        /// Runner name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// No builder is registered under the requested key.
    #[error("no runnable registered under key '{key}'")]
    UnknownRunnable {
        /// The registry key that failed to resolve.
        key: String,
    },
    /// A process runner was given a buffer or shared value that was not
    /// created by a process environment, so it has no transport to ship.
    #[error("runner '{name}': '{resource}' was not created by a process environment")]
    WrongFlavour {
        /// Runner name.
        name: String,
        /// Name of the offending buffer or shared value.
        resource: String,
    },
    /// The worker reported a fault on its status channel.
    #[error("worker fault: {0}")]
    Worker(#[from] Fault),
    /// A command- or status-channel operation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl RunnerError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunnerError::AlreadyStarted { .. } => "runner_already_started",
            RunnerError::NotStarted { .. } => "runner_not_started",
            RunnerError::StartTimeout { .. } => "runner_start_timeout",
            RunnerError::GraceExceeded { .. } => "runner_grace_exceeded",
            RunnerError::Spawn { .. } => "runner_spawn",
            RunnerError::UnknownRunnable { .. } => "runner_unknown_runnable",
            RunnerError::WrongFlavour { .. } => "runner_wrong_flavour",
            RunnerError::Worker(_) => "runner_worker_fault",
            RunnerError::Buffer(_) => "runner_buffer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_round_trips_through_json() {
        let fault = Fault::new("stage-q", "handler overflow");
        let json = serde_json::to_string(&fault).unwrap();
        let back: Fault = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fault);
        assert_eq!(back.to_string(), "stage-q: handler overflow");
    }

    #[test]
    fn labels_are_stable() {
        let err = BufferError::Full { buffer: "b".into() };
        assert_eq!(err.as_label(), "buffer_full");
        let err = RunnerError::UnknownRunnable { key: "k".into() };
        assert_eq!(err.as_label(), "runner_unknown_runnable");
    }
}
