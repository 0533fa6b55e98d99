//! # Status messages: worker→parent lifecycle reports.
//!
//! The status channel carries [`StatusMessage`] values while the worker runs
//! and is terminated with the worker's outcome: `Complete(None)` for a clean
//! exit, `Complete(fault)` when the worker failed. The terminal marker is the
//! error leg — faults do not need their own message variant.

use serde::{Deserialize, Serialize};

/// A lifecycle report from the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusMessage {
    /// The worker has been built and is entering its servicing loop.
    Started,
}
