//! # Process flavour plumbing.
//!
//! Everything that makes the process environment tick:
//!
//! - `wire` — length-prefixed JSON frames shared by all socket protocols.
//! - `host` — the hosting side of a process buffer: the authoritative queue
//!   plus a Unix socket listener relaying remote publishers and the remote
//!   subscriber onto it.
//! - `client` — the remote side: lazily connected publisher and subscriber
//!   endpoints used inside worker processes.
//! - `registry` — the process-global table of runnable builders.
//! - [`worker`] — the child-process entry point and the launch-spec handoff.
//!
//! A buffer created by a process environment is *hosted* by the creating
//! process. Remote ends attach over the buffer's socket; backpressure on a
//! bounded buffer travels naturally through the socket (the host stops
//! reading while the queue is full, so remote writes block). Publisher and
//! subscriber counts — and with them the discard sweep — live with the hosted
//! queue only.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::Capacity;

pub(crate) mod client;
pub(crate) mod host;
pub(crate) mod registry;
pub(crate) mod wire;
pub mod worker;

/// Environment variable carrying the serialised launch spec into a worker.
pub(crate) const LAUNCH_ENV: &str = "PUMA_WORKER_SPEC";

/// Name of the test-harness entry declared by
/// [`enable_process_workers!`](crate::enable_process_workers).
pub(crate) const TEST_ENTRY: &str = "puma_process_worker_entry";

/// Connection details for one process-flavoured buffer, shipped to workers
/// inside the launch spec.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BufferDescriptor {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) capacity: Capacity,
    /// Diagnostic only; payload mismatches surface as transport errors.
    pub(crate) payload_type: String,
}

/// Per-environment state of the process flavour: the socket directory and the
/// program to re-execute for workers.
pub(crate) struct ProcessContext {
    dir: PathBuf,
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessContext {
    /// Creates the socket directory and captures the worker program.
    ///
    /// With `test_harness` set, workers are launched through the libtest
    /// entry declared by [`enable_process_workers!`](crate::enable_process_workers).
    pub(crate) fn new(test_harness: bool) -> io::Result<Arc<Self>> {
        let dir = std::env::temp_dir().join(format!(
            "puma-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        std::fs::create_dir_all(&dir)?;
        let program = std::env::current_exe()?;
        let args = if test_harness {
            vec![
                TEST_ENTRY.to_string(),
                "--exact".to_string(),
                "--nocapture".to_string(),
            ]
        } else {
            Vec::new()
        };
        Ok(Arc::new(Self { dir, program, args }))
    }

    pub(crate) fn socket_path(&self, prefix: &str, id: u64) -> PathBuf {
        self.dir.join(format!("{prefix}-{id:x}.sock"))
    }

    pub(crate) fn program(&self) -> &PathBuf {
        &self.program
    }

    pub(crate) fn args(&self) -> &[String] {
        &self.args
    }
}

impl Drop for ProcessContext {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
