//! Discard sweep boundary behaviour with a shortened grace period.

use std::time::Duration;

use puma::{Capacity, Config, Environment, Fault, FnSubscriber, Wakeup};

fn short_grace_env(grace_ms: u64) -> Environment {
    let mut cfg = Config::default();
    cfg.thread_discard_grace = Duration::from_millis(grace_ms);
    Environment::thread_with(cfg)
}

#[test]
fn sweep_empties_an_abandoned_buffer() {
    let env = short_grace_env(100);
    let buffer = env.create_buffer::<i64>("abandoned", Capacity::Bounded(8)).unwrap();
    {
        let mut publisher = buffer.publish().unwrap();
        for v in [1, 2, 3] {
            publisher.publish_value(v).unwrap();
        }
    }
    assert_eq!(buffer.len(), 3);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(buffer.len(), 0, "grace elapsed, queue must be drained");

    // A probe attaching after the sweep observes empty state.
    let wakeup = Wakeup::new();
    let mut subscription = buffer.subscribe(&wakeup).unwrap();
    let mut probe = FnSubscriber::new(|_v: i64| Ok(()));
    let outcome = subscription.call_events(&mut probe).unwrap();
    assert_eq!(outcome.delivered, 0);
    assert!(!outcome.completed);
}

#[test]
fn attach_during_grace_preserves_the_queue() {
    let env = short_grace_env(150);
    let buffer = env.create_buffer::<i64>("reclaimed", Capacity::Bounded(8)).unwrap();
    {
        let mut publisher = buffer.publish().unwrap();
        publisher.publish_value(7).unwrap();
    }

    std::thread::sleep(Duration::from_millis(40));
    // Re-attachment inside the grace window cancels the sweep.
    let wakeup = Wakeup::new();
    let mut subscription = buffer.subscribe(&wakeup).unwrap();

    std::thread::sleep(Duration::from_millis(300));
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::<i64>::new()));
    let mut collector = {
        let seen = std::sync::Arc::clone(&seen);
        FnSubscriber::new(move |v: i64| {
            seen.lock().unwrap().push(v);
            Ok(())
        })
    };
    subscription.call_events(&mut collector).unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[7]);
}

#[test]
fn discarded_clean_completion_reappears_for_late_subscriber() {
    let env = short_grace_env(60);
    let buffer = env.create_buffer::<i64>("late", Capacity::Bounded(8)).unwrap();
    {
        let mut publisher = buffer.publish().unwrap();
        publisher.publish_complete(None).unwrap();
    }
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(buffer.len(), 0);

    let wakeup = Wakeup::new();
    let mut subscription = buffer.subscribe(&wakeup).unwrap();
    let mut probe = FnSubscriber::new(|_v: i64| Ok(()));
    let outcome = subscription.call_events(&mut probe).unwrap();
    assert!(
        outcome.completed,
        "the terminal marker must survive the sweep for late subscribers"
    );
}

#[test]
fn discarded_error_completion_fails_the_next_attach() {
    let env = short_grace_env(60);
    let buffer = env.create_buffer::<i64>("poisoned", Capacity::Bounded(8)).unwrap();
    {
        let mut publisher = buffer.publish().unwrap();
        publisher
            .publish_complete(Some(Fault::new("upstream", "exploded")))
            .unwrap();
    }
    std::thread::sleep(Duration::from_millis(200));

    let err = buffer.publish().unwrap_err();
    assert_eq!(err.as_label(), "buffer_discarded_error");
}
