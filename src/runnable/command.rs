//! # Commands: parent→worker control messages.
//!
//! Every runner owns a command channel carrying [`Command`] values from the
//! parent to the worker's servicing loop. `Stop` and the tick controls are
//! built in and always handled; `Invoke` dispatches to handlers the runnable
//! registered under a method name.
//!
//! A command call returns on the parent side as soon as the command is
//! enqueued; there is no in-band return value. Arguments cross process
//! boundaries, so they are a JSON value rather than captured state.

use serde::{Deserialize, Serialize};

/// A control message executed by the worker's servicing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Cooperative cancellation: the loop finishes its current iteration and
    /// exits cleanly.
    Stop,
    /// Disarms ticking.
    PauseTicks,
    /// Arms ticking; the first tick fires one full interval after dispatch.
    ResumeTicks,
    /// Changes the tick interval; the next deadline is recomputed from the
    /// last tick boundary.
    SetTickInterval {
        /// New interval in seconds; must be positive.
        seconds: f64,
    },
    /// Invokes a handler the runnable registered under `method`.
    Invoke {
        /// Registered handler name.
        method: String,
        /// Positional/keyed arguments, serialised.
        args: serde_json::Value,
    },
}
