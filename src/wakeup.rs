//! # Wakeup: the many-to-one selection primitive.
//!
//! A [`Wakeup`] is an edge-triggered, idempotent event with one waiter and any
//! number of signallers. One `Wakeup` may be registered with the subscribe
//! calls of several buffers; any of them signalling wakes the waiter. This is
//! what lets a servicing loop sleep on N input channels plus its command
//! channel without polling.
//!
//! ## Rules
//! - `signal()` never blocks; concurrent signals collapse into one.
//! - `wait(timeout)` returns `true` as soon as the event has been set since
//!   the last `consume()`, without clearing it.
//! - `consume()` clears the event.
//! - Cloning shares the underlying event; a clone is how a buffer stores the
//!   subscriber's wakeup.
//!
//! Wakeups are process-local. Cross-process buffers signal the wakeup of the
//! relay endpoint inside the subscriber's process, so the same primitive
//! serves both environment flavours.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Edge-triggered single-waiter event.
#[derive(Clone)]
pub struct Wakeup {
    inner: Arc<Inner>,
}

struct Inner {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Default for Wakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl Wakeup {
    /// Creates an unset wakeup.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Sets the event and wakes the waiter. Non-blocking; idempotent.
    pub fn signal(&self) {
        let mut flag = self.inner.flag.lock().expect("wakeup lock poisoned");
        *flag = true;
        drop(flag);
        self.inner.cond.notify_one();
    }

    /// Blocks until the event is set or `timeout` elapses.
    ///
    /// `None` waits indefinitely. Returns `true` if the event was set, which
    /// it remains until [`consume`](Self::consume) clears it.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut flag = self.inner.flag.lock().expect("wakeup lock poisoned");
        match timeout {
            None => {
                while !*flag {
                    flag = self.inner.cond.wait(flag).expect("wakeup lock poisoned");
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*flag {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    let (guard, result) = self
                        .inner
                        .cond
                        .wait_timeout(flag, remaining)
                        .expect("wakeup lock poisoned");
                    flag = guard;
                    if result.timed_out() && !*flag {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Atomically clears the event.
    pub fn consume(&self) {
        let mut flag = self.inner.flag.lock().expect("wakeup lock poisoned");
        *flag = false;
    }

    /// Returns whether the event is currently set, without clearing it.
    pub fn is_signalled(&self) -> bool {
        *self.inner.flag.lock().expect("wakeup lock poisoned")
    }
}

impl std::fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wakeup")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_before_wait_returns_immediately() {
        let w = Wakeup::new();
        w.signal();
        assert!(w.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn wait_times_out_when_unsignalled() {
        let w = Wakeup::new();
        assert!(!w.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn concurrent_signals_collapse() {
        let w = Wakeup::new();
        w.signal();
        w.signal();
        w.signal();
        assert!(w.wait(Some(Duration::from_millis(1))));
        w.consume();
        // A single consume clears however many signals were raised.
        assert!(!w.wait(Some(Duration::from_millis(10))));
    }

    #[test]
    fn wait_does_not_clear_until_consumed() {
        let w = Wakeup::new();
        w.signal();
        assert!(w.wait(Some(Duration::from_millis(1))));
        assert!(w.is_signalled());
        w.consume();
        assert!(!w.is_signalled());
    }

    #[test]
    fn clone_wakes_the_waiter() {
        let w = Wakeup::new();
        let signaller = w.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaller.signal();
        });
        assert!(w.wait(Some(Duration::from_secs(5))));
        handle.join().unwrap();
    }
}
