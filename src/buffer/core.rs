//! # In-memory buffer core: queue, counts, completion, discard sweep.
//!
//! [`Core`] is the single source of truth for one buffer: the FIFO queue, the
//! publisher/subscriber counts, the completed flag and the discard machinery.
//! The thread-flavoured backend wraps a `Core` directly; the process-flavoured
//! backend hosts one in the creating process and relays remote ends onto it,
//! so counts and the sweep have exactly one authority per buffer.
//!
//! ## Lock discipline
//! Enqueue, drain, attach, detach and sweep arming all run under the single
//! state mutex. The subscriber's wakeup is signalled *after* the mutation and
//! *outside* the lock. Blocked bounded publishes wait on the `space`
//! condition variable and re-check completion on every wake.
//!
//! ## Discard sweep
//! When the last publisher or subscriber detaches while items remain queued, a
//! sweep thread is armed. It sleeps for the grace period and then, if nobody
//! re-attached in the meantime, drains the queue:
//!
//! - plain values are dropped (logged at `warn!` unless suppressed),
//! - a discarded clean completion is remembered and re-enqueued for the next
//!   subscriber, so the terminal marker is never lost,
//! - a discarded error completion is parked on the buffer and re-raised by
//!   the next attach, so no error is silently dropped.
//!
//! Re-attachment cancels the sweep by bumping an epoch counter; the sweep
//! re-checks the arm condition when it wakes and either re-arms or exits.
//! Arming therefore never blocks and never joins a thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use super::item::Item;
use super::BufferId;
use crate::error::{BufferError, Fault};
use crate::wakeup::Wakeup;

pub(crate) struct Core<T> {
    name: String,
    id: BufferId,
    /// `None` for unbounded buffers.
    capacity: Option<usize>,
    grace: Duration,
    warn_on_discard: bool,
    state: Mutex<State<T>>,
    space: Condvar,
}

struct State<T> {
    queue: VecDeque<Item<T>>,
    completed: bool,
    publishers: usize,
    subscribers: usize,
    wakeup: Option<Wakeup>,
    /// Bumped by every attach; a sleeping sweep only fires if it is unchanged.
    sweep_epoch: u64,
    sweep_running: bool,
    /// A clean completion was discarded; re-enqueued on the next subscribe.
    complete_discarded: bool,
    /// An error completion was discarded; re-raised on the next attach.
    parked_fault: Option<Fault>,
}

impl<T: Send + 'static> Core<T> {
    pub(crate) fn new(
        name: impl Into<String>,
        id: BufferId,
        capacity: Option<usize>,
        grace: Duration,
        warn_on_discard: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            id,
            capacity: capacity.map(|c| c.max(1)),
            grace,
            warn_on_discard,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                completed: false,
                publishers: 0,
                subscribers: 0,
                wakeup: None,
                sweep_epoch: 0,
                sweep_running: false,
                complete_discarded: false,
                parked_fault: None,
            }),
            space: Condvar::new(),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn id(&self) -> BufferId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().expect("buffer lock poisoned")
    }

    pub(crate) fn attach_publisher(self: &Arc<Self>) -> Result<(), BufferError> {
        let mut state = self.lock();
        if let Some(fault) = state.parked_fault.clone() {
            return Err(BufferError::Discarded {
                buffer: self.name.clone(),
                fault,
            });
        }
        state.sweep_epoch += 1;
        state.publishers += 1;
        debug!(buffer = %self.name, publishers = state.publishers, "publisher attached");
        Ok(())
    }

    pub(crate) fn detach_publisher(self: &Arc<Self>) {
        let mut state = self.lock();
        state.publishers = state.publishers.saturating_sub(1);
        debug!(buffer = %self.name, publishers = state.publishers, "publisher detached");
        self.arm_sweep_if_abandoned(&mut state);
    }

    pub(crate) fn attach_subscriber(self: &Arc<Self>, wakeup: Wakeup) -> Result<(), BufferError> {
        let signal;
        {
            let mut state = self.lock();
            if let Some(fault) = state.parked_fault.clone() {
                return Err(BufferError::Discarded {
                    buffer: self.name.clone(),
                    fault,
                });
            }
            if state.subscribers != 0 {
                return Err(BufferError::AlreadySubscribed {
                    buffer: self.name.clone(),
                });
            }
            state.sweep_epoch += 1;
            state.subscribers = 1;
            if state.complete_discarded {
                debug!(buffer = %self.name, "re-enqueueing previously discarded completion");
                state.queue.push_back(Item::Complete(None));
                state.complete_discarded = false;
            }
            signal = if state.queue.is_empty() {
                None
            } else {
                Some(wakeup.clone())
            };
            state.wakeup = Some(wakeup);
        }
        // Items may already be queued from before the subscription existed.
        if let Some(wakeup) = signal {
            wakeup.signal();
        }
        Ok(())
    }

    pub(crate) fn detach_subscriber(self: &Arc<Self>) {
        let mut state = self.lock();
        state.subscribers = 0;
        state.wakeup = None;
        debug!(buffer = %self.name, "subscriber detached");
        self.arm_sweep_if_abandoned(&mut state);
    }

    /// Appends an item, blocking while a bounded buffer is full.
    ///
    /// With `block == false` a full buffer returns [`BufferError::Full`]
    /// instead. Fails with [`BufferError::Completed`] once terminated.
    pub(crate) fn push(&self, item: Item<T>, block: bool) -> Result<(), BufferError> {
        let wakeup;
        {
            let mut state = self.lock();
            loop {
                if state.completed {
                    return Err(BufferError::Completed {
                        buffer: self.name.clone(),
                    });
                }
                match self.capacity {
                    Some(cap) if state.queue.len() >= cap => {
                        if !block {
                            return Err(BufferError::Full {
                                buffer: self.name.clone(),
                            });
                        }
                        state = self.space.wait(state).expect("buffer lock poisoned");
                    }
                    _ => break,
                }
            }
            if item.is_complete() {
                state.completed = true;
            }
            state.queue.push_back(item);
            wakeup = state.wakeup.clone();
        }
        if let Some(wakeup) = wakeup {
            wakeup.signal();
        }
        Ok(())
    }

    /// Pops the head of the queue without blocking.
    pub(crate) fn pop(&self) -> Option<Item<T>> {
        let item = {
            let mut state = self.lock();
            state.queue.pop_front()
        };
        if item.is_some() {
            self.space.notify_one();
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Arms the discard sweep when both counts are zero and items remain.
    ///
    /// Must be called with the state lock held.
    fn arm_sweep_if_abandoned(self: &Arc<Self>, state: &mut State<T>) {
        if state.publishers != 0 || state.subscribers != 0 {
            return;
        }
        if state.queue.is_empty() || state.sweep_running {
            return;
        }
        state.sweep_running = true;
        let epoch = state.sweep_epoch;
        let core = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("discard:{}", self.name))
            .spawn(move || core.sweep(epoch));
        if let Err(err) = spawned {
            state.sweep_running = false;
            warn!(buffer = %self.name, error = %err, "failed to spawn discard sweep");
        } else {
            debug!(buffer = %self.name, grace = ?self.grace, "discard sweep armed");
        }
    }

    fn sweep(self: Arc<Self>, mut epoch: u64) {
        loop {
            std::thread::sleep(self.grace);
            let mut state = self.lock();
            if state.sweep_epoch != epoch {
                // Someone attached while we slept. If they have already gone
                // away again, restart the grace period; otherwise stand down.
                if state.publishers == 0 && state.subscribers == 0 && !state.queue.is_empty() {
                    epoch = state.sweep_epoch;
                    continue;
                }
                state.sweep_running = false;
                debug!(buffer = %self.name, "discard sweep cancelled");
                return;
            }
            if state.publishers == 0 && state.subscribers == 0 {
                self.discard_queue(&mut state);
            }
            state.sweep_running = false;
            return;
        }
    }

    fn discard_queue(&self, state: &mut State<T>) {
        let mut dropped = 0usize;
        while let Some(item) = state.queue.pop_front() {
            match item {
                Item::Value(_) => dropped += 1,
                Item::Complete(None) => {
                    debug!(buffer = %self.name, "discarding clean completion; will re-send on re-subscribe");
                    state.complete_discarded = true;
                }
                Item::Complete(Some(fault)) => {
                    warn!(buffer = %self.name, fault = %fault, "discarding error completion; parking it for the next attach");
                    state.parked_fault = Some(fault);
                }
            }
        }
        if dropped > 0 && self.warn_on_discard {
            warn!(buffer = %self.name, dropped, "discarded items from abandoned buffer");
        }
        self.space.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(capacity: Option<usize>, grace_ms: u64) -> Arc<Core<u32>> {
        Core::new(
            "test",
            BufferId::next(),
            capacity,
            Duration::from_millis(grace_ms),
            false,
        )
    }

    #[test]
    fn fifo_order_is_preserved() {
        let c = core(None, 1000);
        c.attach_publisher().unwrap();
        c.push(Item::Value(1), true).unwrap();
        c.push(Item::Value(2), true).unwrap();
        assert_eq!(c.pop(), Some(Item::Value(1)));
        assert_eq!(c.pop(), Some(Item::Value(2)));
        assert_eq!(c.pop(), None);
    }

    #[test]
    fn push_after_complete_fails() {
        let c = core(None, 1000);
        c.attach_publisher().unwrap();
        c.push(Item::Complete(None), true).unwrap();
        let err = c.push(Item::Value(1), true).unwrap_err();
        assert_eq!(err.as_label(), "buffer_completed");
        // A second completion is rejected the same way.
        let err = c.push(Item::Complete(None), true).unwrap_err();
        assert_eq!(err.as_label(), "buffer_completed");
    }

    #[test]
    fn bounded_push_reports_full_without_blocking() {
        let c = core(Some(2), 1000);
        c.attach_publisher().unwrap();
        c.push(Item::Value(1), false).unwrap();
        c.push(Item::Value(2), false).unwrap();
        let err = c.push(Item::Value(3), false).unwrap_err();
        assert_eq!(err.as_label(), "buffer_full");
    }

    #[test]
    fn bounded_push_unblocks_when_room_appears() {
        let c = core(Some(1), 1000);
        c.attach_publisher().unwrap();
        c.push(Item::Value(1), true).unwrap();
        let pusher = {
            let c = Arc::clone(&c);
            std::thread::spawn(move || c.push(Item::Value(2), true))
        };
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(c.pop(), Some(Item::Value(1)));
        pusher.join().unwrap().unwrap();
        assert_eq!(c.pop(), Some(Item::Value(2)));
    }

    #[test]
    fn second_subscriber_is_rejected() {
        let c = core(None, 1000);
        c.attach_subscriber(Wakeup::new()).unwrap();
        let err = c.attach_subscriber(Wakeup::new()).unwrap_err();
        assert_eq!(err.as_label(), "buffer_already_subscribed");
        c.detach_subscriber();
        c.attach_subscriber(Wakeup::new()).unwrap();
    }

    #[test]
    fn sweep_drains_abandoned_queue() {
        let c = core(None, 50);
        c.attach_publisher().unwrap();
        c.push(Item::Value(1), true).unwrap();
        c.push(Item::Value(2), true).unwrap();
        c.detach_publisher();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn attach_during_grace_cancels_sweep() {
        let c = core(None, 80);
        c.attach_publisher().unwrap();
        c.push(Item::Value(1), true).unwrap();
        c.detach_publisher();
        std::thread::sleep(Duration::from_millis(20));
        c.attach_publisher().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(c.len(), 1, "queue must be preserved after cancelled sweep");
        c.detach_publisher();
    }

    #[test]
    fn discarded_clean_completion_is_resent_on_resubscribe() {
        let c = core(None, 30);
        c.attach_publisher().unwrap();
        c.push(Item::Complete(None), true).unwrap();
        c.detach_publisher();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(c.len(), 0);
        let wakeup = Wakeup::new();
        c.attach_subscriber(wakeup.clone()).unwrap();
        assert!(wakeup.wait(Some(Duration::from_millis(100))));
        assert_eq!(c.pop(), Some(Item::Complete(None)));
    }

    #[test]
    fn discarded_error_completion_is_raised_on_next_attach() {
        let c = core(None, 30);
        c.attach_publisher().unwrap();
        c.push(Item::Complete(Some(Fault::new("up", "boom"))), true)
            .unwrap();
        c.detach_publisher();
        std::thread::sleep(Duration::from_millis(100));
        let err = c.attach_publisher().unwrap_err();
        assert_eq!(err.as_label(), "buffer_discarded_error");
        let err = c.attach_subscriber(Wakeup::new()).unwrap_err();
        assert_eq!(err.as_label(), "buffer_discarded_error");
    }

    #[test]
    fn subscriber_wakeup_fires_on_push() {
        let c = core(None, 1000);
        let wakeup = Wakeup::new();
        c.attach_subscriber(wakeup.clone()).unwrap();
        c.attach_publisher().unwrap();
        assert!(!wakeup.wait(Some(Duration::from_millis(10))));
        c.push(Item::Value(9), true).unwrap();
        assert!(wakeup.wait(Some(Duration::from_secs(1))));
    }
}
