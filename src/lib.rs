//! # puma
//!
//! **Puma** is a concurrency runtime that lets an application express a
//! computation as a graph of independent workers exchanging typed data over
//! FIFO buffers — with a single knob switching every worker between OS
//! threads and child processes.
//!
//! | Area            | Description                                                              | Key types / traits                        |
//! |-----------------|--------------------------------------------------------------------------|-------------------------------------------|
//! | **Buffers**     | Typed single-subscriber, multi-publisher FIFO with completion semantics. | [`Buffer`], [`Publisher`], [`Subscription`] |
//! | **Selection**   | One waiter multiplexing many buffers without polling.                    | [`Wakeup`]                                |
//! | **Workers**     | Registration-table worker logic with commands and ticks.                 | [`Runnable`], [`Subscriber`], [`WorkerSpec`] |
//! | **Lifecycle**   | Spawn, observe, and tear down workers with bounded timeouts.             | [`Runner`], [`RunnerState`]               |
//! | **Environment** | One factory fixing thread- vs process-flavour for the whole program.     | [`Environment`], [`Flavour`]              |
//! | **Logging**     | Per-process records funnelled into one listener-owned sink set.          | [`funnel`]                                |
//! | **Errors**      | Typed errors for buffers, runners, and the dataflow itself.              | [`BufferError`], [`RunnerError`], [`Fault`] |
//!
//! ```no_run
//! use puma::{Capacity, Environment, FnSubscriber, Fault, Runnable, Wiring, WorkerSpec};
//!
//! fn doubler(wiring: &Wiring) -> Result<Runnable, Fault> {
//!     let input = wiring.input::<i64>("in")?;
//!     let output = wiring.output::<i64>("out")?;
//!     let mut runnable = Runnable::new(wiring.worker_name());
//!     let port = runnable.output(&output);
//!     runnable.subscribe(
//!         &input,
//!         FnSubscriber::new(move |v: i64| port.publish_value(v * 2)),
//!     );
//!     Ok(runnable)
//! }
//!
//! fn register_workers() {
//!     puma::register_runnable("doubler", doubler);
//! }
//!
//! fn main() {
//!     // Hands control to the worker body when re-executed as a worker.
//!     puma::process::worker::init(register_workers);
//!
//!     // One line decides threads vs processes for the whole graph.
//!     let env = Environment::thread();
//!
//!     let input = env.create_buffer::<i64>("in", Capacity::Bounded(16)).unwrap();
//!     let output = env.create_buffer::<i64>("out", Capacity::Bounded(16)).unwrap();
//!     let spec = WorkerSpec::new("doubler").input("in", &input).output("out", &output);
//!     let mut runner = env.create_runner(spec).unwrap();
//!     runner.start_blocking().unwrap();
//!
//!     let mut publisher = input.publish().unwrap();
//!     publisher.publish_value(21).unwrap();
//!     publisher.publish_complete(None).unwrap();
//!     drop(publisher);
//!
//!     runner.check_for_errors().unwrap();
//!     runner.shutdown().unwrap();
//! }
//! ```

mod buffer;
mod config;
mod environment;
mod error;
pub mod funnel;
pub mod multicaster;
pub mod process;
mod runnable;
mod runner;
mod shared;
mod timestamp;
mod wakeup;

// ---- Public re-exports ----

pub use buffer::{
    Buffer, BufferId, Capacity, DrainOutcome, FnSubscriber, Item, Payload, Publisher, Subscriber,
    Subscription,
};
pub use config::Config;
pub use environment::{Environment, Flavour};
pub use error::{BufferError, Fault, RunnerError};
pub use process::registry::{register_runnable, RunnableBuilder};
pub use runnable::{Command, OutputPort, Runnable, StatusMessage, Wiring, WorkerSpec};
pub use runner::{Runner, RunnerState};
pub use shared::SharedValue;
pub use timestamp::monotonic_timestamp;
pub use wakeup::Wakeup;
