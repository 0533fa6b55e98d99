//! # Runnable builder registry.
//!
//! Worker construction is a registration table: a process registers builder
//! functions under string keys, and a [`WorkerSpec`](crate::WorkerSpec)
//! references a key. The builder runs where the worker runs — on the worker
//! thread in the thread flavour, inside the child process in the process
//! flavour — so runnable state never has to cross a process boundary.
//!
//! Builders are plain `fn` pointers on purpose: a child process only has
//! statics to offer, and keeping thread and process flavours on the same path
//! is what makes the environment switch a one-line change.

use std::sync::OnceLock;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Fault;
use crate::runnable::{Runnable, Wiring};

/// A registered runnable constructor.
///
/// Receives the resolved wiring (params, typed buffers, shared values) and
/// returns the configured runnable.
pub type RunnableBuilder = fn(&Wiring) -> Result<Runnable, Fault>;

static REGISTRY: OnceLock<DashMap<String, RunnableBuilder>> = OnceLock::new();

fn registry() -> &'static DashMap<String, RunnableBuilder> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Registers `builder` under `key`, replacing any previous registration.
///
/// Every process that may host the worker must perform the registration —
/// binaries do so via [`worker::init`](crate::process::worker::init), test
/// binaries via [`enable_process_workers!`](crate::enable_process_workers).
pub fn register_runnable(key: &str, builder: RunnableBuilder) {
    debug!(key, "registering runnable builder");
    registry().insert(key.to_string(), builder);
}

pub(crate) fn lookup(key: &str) -> Option<RunnableBuilder> {
    registry().get(key).map(|entry| *entry.value())
}

/// Registers the builders the crate itself ships (the log listener).
pub(crate) fn register_builtins() {
    crate::funnel::register_listener();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty(wiring: &Wiring) -> Result<Runnable, Fault> {
        Ok(Runnable::new(wiring.worker_name()))
    }

    #[test]
    fn lookup_finds_registered_builders() {
        register_runnable("registry-test", empty);
        assert!(lookup("registry-test").is_some());
        assert!(lookup("registry-missing").is_none());
    }
}
