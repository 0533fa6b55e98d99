//! Two-stage pipeline: a doubler worker between a publisher and a collector.
//!
//! Run with `--features` nothing required:
//! ```sh
//! cargo run --example pipeline
//! ```
//! Switch `Environment::thread()` to `Environment::process().unwrap()` to run
//! the same graph across processes.

use std::time::Duration;

use puma::{Capacity, Environment, Fault, FnSubscriber, Runnable, Wakeup, Wiring, WorkerSpec};

fn doubler(wiring: &Wiring) -> Result<Runnable, Fault> {
    let input = wiring.input::<i64>("in")?;
    let output = wiring.output::<i64>("out")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let port = runnable.output(&output);
    runnable.subscribe(
        &input,
        FnSubscriber::new(move |v: i64| port.publish_value(v * 2)),
    );
    Ok(runnable)
}

fn register_workers() {
    puma::register_runnable("doubler", doubler);
}

fn main() {
    puma::process::worker::init(register_workers);

    let env = Environment::thread();
    let input = env.create_buffer::<i64>("in", Capacity::Bounded(16)).unwrap();
    let output = env.create_buffer::<i64>("out", Capacity::Bounded(16)).unwrap();

    let spec = WorkerSpec::new("doubler")
        .input("in", &input)
        .output("out", &output);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    {
        let mut publisher = input.publish().unwrap();
        for v in 1..=8 {
            publisher.publish_value(v).unwrap();
        }
        publisher.publish_complete(None).unwrap();
    }

    let wakeup = Wakeup::new();
    let mut subscription = output.subscribe(&wakeup).unwrap();
    let mut collector = FnSubscriber::new(|v: i64| {
        println!("got {v}");
        Ok(())
    });
    loop {
        let outcome = subscription.call_events(&mut collector).unwrap();
        if outcome.completed {
            break;
        }
        wakeup.wait(Some(Duration::from_millis(100)));
    }

    runner.check_for_errors().unwrap();
    runner.shutdown().unwrap();
}
