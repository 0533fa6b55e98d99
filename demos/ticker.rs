//! A tick-driven worker: no inputs, a periodic callback publishing monotonic
//! timestamps, stopped from the parent.
//!
//! ```sh
//! cargo run --example ticker
//! ```

use std::time::Duration;

use puma::{Capacity, Environment, Fault, FnSubscriber, Runnable, Wakeup, Wiring, WorkerSpec};

fn ticker(wiring: &Wiring) -> Result<Runnable, Fault> {
    let ticks = wiring.output::<f64>("ticks")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let port = runnable.output(&ticks);
    runnable.on_tick(Duration::from_millis(250), move |now| {
        port.publish_value(now)
    });
    Ok(runnable)
}

fn register_workers() {
    puma::register_runnable("ticker", ticker);
}

fn main() {
    puma::process::worker::init(register_workers);

    let env = Environment::thread();
    let ticks = env.create_buffer::<f64>("ticks", Capacity::Unbounded).unwrap();
    let mut runner = env
        .create_runner(WorkerSpec::new("ticker").output("ticks", &ticks))
        .unwrap();
    runner.start_blocking().unwrap();

    let wakeup = Wakeup::new();
    let mut subscription = ticks.subscribe(&wakeup).unwrap();
    let mut seen = 0u32;
    let mut printer = FnSubscriber::new(move |stamp: f64| {
        println!("tick at {stamp:.3}");
        Ok(())
    });
    while seen < 5 {
        let outcome = subscription.call_events(&mut printer).unwrap();
        seen += outcome.delivered as u32;
        if outcome.completed {
            break;
        }
        wakeup.wait(Some(Duration::from_millis(500)));
    }

    runner.stop().unwrap();
    runner.join(Duration::from_secs(5)).unwrap();
    println!("ticker stopped after {seen} ticks");
}
