//! Runner lifecycle: states, ticks, commands, error propagation, teardown.

use std::time::{Duration, Instant};

use puma::{
    Capacity, Environment, Fault, FnSubscriber, Runnable, Runner, RunnerError, RunnerState,
    Wiring, WorkerSpec,
};

fn ticker(wiring: &Wiring) -> Result<Runnable, Fault> {
    let ticks = wiring.output::<f64>("ticks")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let port = runnable.output(&ticks);
    runnable.on_tick(Duration::from_millis(40), move |now| {
        port.publish_value(now)
    });
    Ok(runnable)
}

fn faulty_stage(wiring: &Wiring) -> Result<Runnable, Fault> {
    let input = wiring.input::<i64>("in")?;
    let output = wiring.output::<i64>("out")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let port = runnable.output(&output);
    let origin = wiring.worker_name().to_string();
    runnable.subscribe(
        &input,
        FnSubscriber::new(move |v: i64| {
            if v == 3 {
                return Err(Fault::new(origin.clone(), "refusing to process 3"));
            }
            port.publish_value(v * 10)
        }),
    );
    Ok(runnable)
}

fn counter(wiring: &Wiring) -> Result<Runnable, Fault> {
    let count = wiring.shared::<i64>("count")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    runnable.on_command("bump", move |_args| {
        let current = count.get()?;
        count.set(current + 1)
    });
    Ok(runnable)
}

fn broken_builder(wiring: &Wiring) -> Result<Runnable, Fault> {
    Err(Fault::new(wiring.worker_name(), "builder refused"))
}

fn register_workers() {
    puma::register_runnable("ticker", ticker);
    puma::register_runnable("faulty-stage", faulty_stage);
    puma::register_runnable("counter", counter);
    puma::register_runnable("broken-builder", broken_builder);
}

fn poll_for_fault(runner: &mut Runner, deadline: Duration) -> Fault {
    let limit = Instant::now() + deadline;
    loop {
        match runner.check_for_errors() {
            Err(RunnerError::Worker(fault)) => return fault,
            Err(other) => panic!("unexpected runner error: {other}"),
            Ok(()) => {}
        }
        assert!(Instant::now() < limit, "no fault reported in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn stop_command_walks_the_state_machine() {
    register_workers();
    let env = Environment::thread();
    let ticks = env.create_buffer::<f64>("ticks", Capacity::Unbounded).unwrap();
    let spec = WorkerSpec::new("ticker").output("ticks", &ticks);
    let mut runner = env.create_runner(spec).unwrap();
    assert_eq!(runner.state(), RunnerState::Created);

    runner.start_blocking().unwrap();
    assert_eq!(runner.state(), RunnerState::Running);

    std::thread::sleep(Duration::from_millis(100));
    runner.stop().unwrap();
    assert_eq!(runner.state(), RunnerState::Stopping);

    runner.join(Duration::from_secs(5)).unwrap();
    assert_eq!(runner.state(), RunnerState::Stopped);

    // 40 ms ticks, stopped at ~100 ms: two ticks, maybe a third on a slow
    // host, never more.
    let wakeup = env.create_wakeup();
    let mut subscription = ticks.subscribe(&wakeup).unwrap();
    let mut collector = FnSubscriber::new(|_v: f64| Ok(()));
    let outcome = subscription.call_events(&mut collector).unwrap();
    assert!(outcome.completed, "ticker output must be completed");
    assert!(
        (2..=3).contains(&outcome.delivered),
        "expected 2-3 ticks, saw {}",
        outcome.delivered
    );
}

#[test]
fn tick_timestamps_are_monotonic() {
    register_workers();
    let env = Environment::thread();
    let ticks = env.create_buffer::<f64>("tick-stamps", Capacity::Unbounded).unwrap();
    let spec = WorkerSpec::new("ticker").named("ticker-mono").output("ticks", &ticks);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();
    std::thread::sleep(Duration::from_millis(140));
    runner.stop().unwrap();
    runner.join(Duration::from_secs(5)).unwrap();

    let wakeup = env.create_wakeup();
    let mut subscription = ticks.subscribe(&wakeup).unwrap();
    let stamps = std::sync::Arc::new(std::sync::Mutex::new(Vec::<f64>::new()));
    let mut collector = {
        let stamps = std::sync::Arc::clone(&stamps);
        FnSubscriber::new(move |v: f64| {
            stamps.lock().unwrap().push(v);
            Ok(())
        })
    };
    subscription.call_events(&mut collector).unwrap();
    let stamps = stamps.lock().unwrap();
    assert!(stamps.len() >= 2, "expected at least two ticks");
    for pair in stamps.windows(2) {
        assert!(pair[1] >= pair[0], "tick timestamps must not go backwards");
    }
    let now = puma::monotonic_timestamp();
    assert!(stamps.iter().all(|&s| s <= now));
}

#[test]
fn handler_fault_reaches_downstream_and_parent() {
    register_workers();
    let env = Environment::thread();
    let input = env.create_buffer::<i64>("q-in", Capacity::Bounded(8)).unwrap();
    let output = env.create_buffer::<i64>("q-out", Capacity::Bounded(8)).unwrap();
    let spec = WorkerSpec::new("faulty-stage")
        .named("stage-q")
        .input("in", &input)
        .output("out", &output);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    {
        let mut publisher = input.publish().unwrap();
        for v in 1..=5 {
            publisher.publish_value(v).unwrap();
        }
        publisher.publish_complete(None).unwrap();
    }

    // Downstream: some prefix of processed values, then the error completion.
    let wakeup = env.create_wakeup();
    let mut subscription = output.subscribe(&wakeup).unwrap();
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::<i64>::new()));
    let terminal = std::sync::Arc::new(std::sync::Mutex::new(None::<Option<Fault>>));
    let mut collector = {
        let seen = std::sync::Arc::clone(&seen);
        let terminal = std::sync::Arc::clone(&terminal);
        FnSubscriber::new(move |v: i64| {
            seen.lock().unwrap().push(v);
            Ok(())
        })
        .with_on_complete(move |error| {
            *terminal.lock().unwrap() = Some(error);
            Ok(())
        })
    };
    let limit = Instant::now() + Duration::from_secs(10);
    loop {
        if subscription.call_events(&mut collector).unwrap().completed {
            break;
        }
        assert!(Instant::now() < limit);
        wakeup.wait(Some(Duration::from_millis(50)));
    }
    assert_eq!(seen.lock().unwrap().as_slice(), &[10, 20]);
    let terminal = terminal.lock().unwrap().clone().flatten().expect("error completion");
    assert_eq!(terminal.origin, "stage-q");

    // Parent: the same fault arrives via the status channel.
    let fault = poll_for_fault(&mut runner, Duration::from_secs(10));
    assert_eq!(fault.origin, "stage-q");
    assert_eq!(runner.state(), RunnerState::Failed);
}

#[test]
fn invoke_dispatches_registered_command_handlers() {
    register_workers();
    let env = Environment::thread();
    let count = env.create_shared_value::<i64>("count", 0).unwrap();
    let spec = WorkerSpec::new("counter").shared_value("count", &count);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    runner.invoke("bump", serde_json::Value::Null).unwrap();
    runner.invoke("bump", serde_json::Value::Null).unwrap();

    let limit = Instant::now() + Duration::from_secs(5);
    while count.get().unwrap() < 2 {
        assert!(Instant::now() < limit, "commands were not dispatched");
        std::thread::sleep(Duration::from_millis(10));
    }
    runner.check_for_errors().unwrap();
    runner.shutdown().unwrap();
}

#[test]
fn unknown_command_faults_the_worker() {
    register_workers();
    let env = Environment::thread();
    let count = env.create_shared_value::<i64>("count2", 0).unwrap();
    let spec = WorkerSpec::new("counter").named("counter-2").shared_value("count", &count);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    runner.invoke("no-such-method", serde_json::Value::Null).unwrap();
    let fault = poll_for_fault(&mut runner, Duration::from_secs(5));
    assert!(fault.message.contains("no-such-method"));
}

#[test]
fn builder_fault_surfaces_at_start() {
    register_workers();
    let env = Environment::thread();
    let spec = WorkerSpec::new("broken-builder");
    let mut runner = env.create_runner(spec).unwrap();
    let err = runner.start_blocking().unwrap_err();
    match err {
        RunnerError::Worker(fault) => assert_eq!(fault.message, "builder refused"),
        other => panic!("expected worker fault, got {other}"),
    }
}

#[test]
fn unregistered_key_faults_the_worker() {
    let env = Environment::thread();
    let spec = WorkerSpec::new("never-registered");
    let mut runner = env.create_runner(spec).unwrap();
    let err = runner.start_blocking().unwrap_err();
    match err {
        RunnerError::Worker(fault) => assert!(fault.message.contains("never-registered")),
        other => panic!("expected worker fault, got {other}"),
    }
}

#[test]
fn shutdown_surfaces_unpolled_faults() {
    register_workers();
    let env = Environment::thread();
    let input = env.create_buffer::<i64>("s-in", Capacity::Bounded(8)).unwrap();
    let output = env.create_buffer::<i64>("s-out", Capacity::Bounded(8)).unwrap();
    let spec = WorkerSpec::new("faulty-stage")
        .named("stage-s")
        .input("in", &input)
        .output("out", &output);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    {
        let mut publisher = input.publish().unwrap();
        publisher.publish_value(3).unwrap();
    }

    // Never poll; the scoped exit must still surface the fault. Give the
    // worker a moment to hit the poisoned value and die.
    std::thread::sleep(Duration::from_millis(300));
    match runner.shutdown() {
        Err(RunnerError::Worker(fault)) => assert_eq!(fault.origin, "stage-s"),
        other => panic!("expected unpolled worker fault, got {other:?}"),
    }
}
