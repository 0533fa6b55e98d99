//! Process-flavoured end-to-end: worker child processes, socket transports,
//! cross-process error propagation, and the thread/process swap law.
//!
//! Workers re-enter this test binary through the entry declared by
//! `enable_process_workers!`.

use std::time::{Duration, Instant};

use puma::{
    Buffer, Capacity, Environment, Fault, FnSubscriber, Payload, Runnable, Runner, RunnerError,
    Wakeup, Wiring, WorkerSpec,
};

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

fn pass_through(wiring: &Wiring) -> Result<Runnable, Fault> {
    let input = wiring.input::<i64>("in")?;
    let output = wiring.output::<i64>("out")?;
    let mut runnable = Runnable::new(wiring.worker_name());
    let port = runnable.output(&output);
    runnable.subscribe(&input, FnSubscriber::new(move |v: i64| port.publish_value(v)));
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

fn register_workers() {
    puma::register_runnable("doubler", doubler);
    puma::register_runnable("pass-through", pass_through);
    puma::register_runnable("faulty-stage", faulty_stage);
    puma::register_runnable("counter", counter);
}

puma::enable_process_workers!(register_workers);

fn drain_until_complete<T: Payload>(
    buffer: &Buffer<T>,
    deadline: Duration,
) -> (Vec<T>, Option<Fault>) {
    use std::sync::{Arc, Mutex};
    let wakeup = Wakeup::new();
    let mut subscription = buffer.subscribe(&wakeup).expect("subscribe");
    let values: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
    let terminal: Arc<Mutex<Option<Option<Fault>>>> = Arc::new(Mutex::new(None));
    let mut collector = {
        let values = Arc::clone(&values);
        let terminal = Arc::clone(&terminal);
        FnSubscriber::new(move |v: T| {
            values.lock().unwrap().push(v);
            Ok(())
        })
        .with_on_complete(move |error| {
            *terminal.lock().unwrap() = Some(error);
            Ok(())
        })
    };
    let limit = Instant::now() + deadline;
    loop {
        let outcome = subscription.call_events(&mut collector).expect("drain");
        if outcome.completed {
            break;
        }
        assert!(Instant::now() < limit, "timed out draining {}", buffer.name());
        wakeup.wait(Some(Duration::from_millis(50)));
    }
    let collected = values.lock().unwrap().drain(..).collect();
    let error = terminal.lock().unwrap().take().flatten();
    (collected, error)
}

fn run_doubler_program(env: &Environment) -> Vec<i64> {
    register_workers();
    let input = env.create_buffer::<i64>("in", Capacity::Bounded(16)).unwrap();
    let output = env.create_buffer::<i64>("out", Capacity::Bounded(16)).unwrap();
    let spec = WorkerSpec::new("doubler")
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

    let (values, error) = drain_until_complete(&output, Duration::from_secs(60));
    assert_eq!(error, None);
    runner.shutdown().unwrap();
    values
}

#[test]
fn process_workers_double_values() {
    let env = Environment::process_for_tests().unwrap();
    assert_eq!(run_doubler_program(&env), vec![2, 4, 6, 8, 10]);
}

#[test]
fn thread_and_process_environments_produce_the_same_stream() {
    let thread_result = run_doubler_program(&Environment::thread());
    let process_result = run_doubler_program(&Environment::process_for_tests().unwrap());
    assert_eq!(thread_result, process_result);
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
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn faults_propagate_through_a_three_stage_process_pipeline() {
    register_workers();
    let env = Environment::process_for_tests().unwrap();
    let a = env.create_buffer::<i64>("a", Capacity::Bounded(16)).unwrap();
    let b = env.create_buffer::<i64>("b", Capacity::Bounded(16)).unwrap();
    let c = env.create_buffer::<i64>("c", Capacity::Bounded(16)).unwrap();
    let out = env.create_buffer::<i64>("pipeline-out", Capacity::Bounded(16)).unwrap();

    let mut p = env
        .create_runner(
            WorkerSpec::new("pass-through")
                .named("stage-p")
                .input("in", &a)
                .output("out", &b),
        )
        .unwrap();
    let mut q = env
        .create_runner(
            WorkerSpec::new("faulty-stage")
                .named("stage-q")
                .input("in", &b)
                .output("out", &c),
        )
        .unwrap();
    let mut r = env
        .create_runner(
            WorkerSpec::new("pass-through")
                .named("stage-r")
                .input("in", &c)
                .output("out", &out),
        )
        .unwrap();
    p.start_blocking().unwrap();
    q.start_blocking().unwrap();
    r.start_blocking().unwrap();

    {
        let mut publisher = a.publish().unwrap();
        for v in 1..=5 {
            publisher.publish_value(v).unwrap();
        }
        publisher.publish_complete(None).unwrap();
    }

    // The terminal collector sees a prefix of processed values, then the
    // error completion forwarded down the graph.
    let (values, error) = drain_until_complete(&out, Duration::from_secs(60));
    assert_eq!(values, vec![10, 20]);
    let error = error.expect("error completion must reach the sink");
    assert_eq!(error.origin, "stage-q");

    // Q failed; R was killed by the inbound error; P finished clean.
    let q_fault = poll_for_fault(&mut q, Duration::from_secs(30));
    assert_eq!(q_fault.origin, "stage-q");
    let r_fault = poll_for_fault(&mut r, Duration::from_secs(30));
    assert_eq!(r_fault.origin, "stage-q");
    p.check_for_errors().unwrap();

    p.shutdown().unwrap();
    drop(q);
    drop(r);
}

#[test]
fn shared_values_are_manager_mediated_across_processes() {
    register_workers();
    let env = Environment::process_for_tests().unwrap();
    let count = env.create_shared_value::<i64>("count", 0).unwrap();
    let spec = WorkerSpec::new("counter").shared_value("count", &count);
    let mut runner = env.create_runner(spec).unwrap();
    runner.start_blocking().unwrap();

    runner.invoke("bump", serde_json::Value::Null).unwrap();
    runner.invoke("bump", serde_json::Value::Null).unwrap();

    let limit = Instant::now() + Duration::from_secs(30);
    while count.get().unwrap() < 2 {
        assert!(Instant::now() < limit, "commands were not dispatched");
        std::thread::sleep(Duration::from_millis(20));
    }
    runner.check_for_errors().unwrap();
    runner.shutdown().unwrap();
}
