//! # Global runtime configuration.
//!
//! [`Config`] centralises the tunables of the substrate: control-channel
//! capacity, start/teardown timeouts, and the discard-sweep grace periods.
//! An [`Environment`](crate::Environment) captures one `Config` at
//! construction and applies it to everything it creates.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use puma::Config;
//!
//! let mut cfg = Config::default();
//! cfg.join_grace = Duration::from_secs(10);
//! cfg.thread_discard_grace = Duration::from_millis(500);
//!
//! assert_eq!(cfg.control_capacity, 10);
//! ```

use std::time::Duration;

/// Global configuration for buffers and runners.
#[derive(Clone, Debug)]
pub struct Config {
    /// Capacity of the command and status channels owned by each runner.
    pub control_capacity: usize,
    /// Maximum time `start_blocking` waits for the worker's `Started` report.
    pub start_timeout: Duration,
    /// Maximum time teardown waits for a worker to exit after `Stop` before
    /// force-terminating it.
    pub join_grace: Duration,
    /// Grace period before a thread-flavoured buffer with no publishers and no
    /// subscriber discards its queued items.
    pub thread_discard_grace: Duration,
    /// Grace period for process-flavoured buffers. Longer, because process
    /// spawn and transport threads can legitimately hold a buffer idle for a
    /// while on slow hosts.
    pub process_discard_grace: Duration,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `control_capacity = 10`
    /// - `start_timeout = 30s`
    /// - `join_grace = 30s`
    /// - `thread_discard_grace = 5s`
    /// - `process_discard_grace = 15s`
    fn default() -> Self {
        Self {
            control_capacity: 10,
            start_timeout: Duration::from_secs(30),
            join_grace: Duration::from_secs(30),
            thread_discard_grace: Duration::from_secs(5),
            process_discard_grace: Duration::from_secs(15),
        }
    }
}
