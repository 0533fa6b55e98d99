//! # The servicing loop.
//!
//! One iteration, driven by the runnable's private [`Wakeup`]:
//!
//! ```text
//! wait(next tick deadline) → consume wakeup
//!   → drain command channel   (Stop / tick control / Invoke)
//!   → drain inputs            (registration order, via call_events)
//!   → tick if due             (monotonic timestamp)
//! ```
//!
//! ## Rules
//! - Exactly one of handler, command dispatch and tick runs at any instant.
//! - The loop exits when a stop was requested, when any input observes its
//!   terminal marker, or when anything returns a fault.
//! - Ticks never pre-empt a drain; a tick that falls behind is re-based to
//!   `now + interval` rather than replayed.
//! - On exit, every output that has not already been completed receives
//!   `Complete(fault?)`, and the fault (if any) is the loop's result.

use std::time::Duration;

use tracing::debug;

use super::{Command, Runnable, SlotOutcome};
use crate::buffer::{Buffer, Subscriber};
use crate::error::Fault;
use crate::timestamp::monotonic_timestamp;
use crate::wakeup::Wakeup;

/// Runs `runnable` to completion, servicing `command_buffer` alongside its
/// inputs. Returns the fault that terminated the loop, if any, after the
/// ending protocol has completed all outputs.
pub(crate) fn run(mut runnable: Runnable, command_buffer: Buffer<Command>) -> Result<(), Fault> {
    let origin = runnable.name().to_string();
    let result = drive(&mut runnable, &command_buffer, &origin);
    let error = result.err();
    for output in runnable.outputs.iter_mut() {
        output.complete(error.clone());
        output.close();
    }
    match error {
        Some(fault) => Err(fault),
        None => Ok(()),
    }
}

fn drive(
    runnable: &mut Runnable,
    command_buffer: &Buffer<Command>,
    origin: &str,
) -> Result<(), Fault> {
    let wakeup = Wakeup::new();
    for output in runnable.outputs.iter_mut() {
        output.open().map_err(|e| e.into_fault(origin))?;
    }
    for input in runnable.inputs.iter_mut() {
        input.open(&wakeup).map_err(|e| e.into_fault(origin))?;
    }
    let mut command_sub = command_buffer
        .subscribe(&wakeup)
        .map_err(|e| e.into_fault(origin))?;

    let mut ticks = Ticks::new(runnable.tick_interval, runnable.ticks_armed);
    let mut collector = CommandCollector::default();

    loop {
        wakeup.wait(ticks.wait_timeout());
        wakeup.consume();

        // Commands first: a stop must win over pending data.
        command_sub.call_events(&mut collector)?;
        let mut stop = collector.channel_closed;
        for command in collector.commands.drain(..) {
            match command {
                Command::Stop => stop = true,
                Command::PauseTicks => ticks.pause(),
                Command::ResumeTicks => ticks.resume(origin)?,
                Command::SetTickInterval { seconds } => ticks.set_interval(seconds, origin)?,
                Command::Invoke { method, args } => {
                    let handler = runnable.commands.get_mut(&method).ok_or_else(|| {
                        Fault::new(origin, format!("unknown command '{method}'"))
                    })?;
                    handler(args)?;
                }
            }
        }
        if stop {
            debug!(runnable = origin, "stop requested, leaving servicing loop");
            return Ok(());
        }

        for input in runnable.inputs.iter_mut() {
            if input.is_completed() {
                continue;
            }
            match input.service() {
                SlotOutcome::Idle => {}
                SlotOutcome::Completed => {
                    debug!(
                        runnable = origin,
                        buffer = %input.buffer_name(),
                        "input completed, leaving servicing loop"
                    );
                    return Ok(());
                }
                SlotOutcome::Fault(fault) => return Err(fault),
            }
        }

        if ticks.due() {
            if let Some(handler) = runnable.tick_handler.as_mut() {
                handler(monotonic_timestamp())?;
            }
        }
    }
}

/// Accumulates drained commands so dispatch happens outside the drain.
#[derive(Default)]
struct CommandCollector {
    commands: Vec<Command>,
    channel_closed: bool,
}

impl Subscriber<Command> for CommandCollector {
    fn on_value(&mut self, value: Command) -> Result<(), Fault> {
        self.commands.push(value);
        Ok(())
    }

    fn on_complete(&mut self, _error: Option<Fault>) -> Result<(), Fault> {
        // The parent released the command channel: treat as a stop request.
        self.channel_closed = true;
        Ok(())
    }
}

/// Tick deadline arithmetic on the monotonic clock.
struct Ticks {
    /// Interval in seconds.
    interval: Option<f64>,
    /// Absolute deadline of the next tick; `None` while paused.
    next: Option<f64>,
}

impl Ticks {
    fn new(interval: Option<f64>, armed: bool) -> Self {
        let next = match (interval, armed) {
            (Some(interval), true) => Some(monotonic_timestamp() + interval),
            _ => None,
        };
        Self { interval, next }
    }

    /// Remaining time until the next deadline; `None` means wait forever.
    fn wait_timeout(&self) -> Option<Duration> {
        self.next
            .map(|next| Duration::from_secs_f64((next - monotonic_timestamp()).max(0.0)))
    }

    fn pause(&mut self) {
        self.next = None;
    }

    fn resume(&mut self, origin: &str) -> Result<(), Fault> {
        let interval = self.interval.ok_or_else(|| {
            Fault::new(origin, "resume_ticks without a configured tick interval")
        })?;
        if self.next.is_none() {
            self.next = Some(monotonic_timestamp() + interval);
        }
        Ok(())
    }

    fn set_interval(&mut self, seconds: f64, origin: &str) -> Result<(), Fault> {
        if !(seconds > 0.0) {
            return Err(Fault::new(origin, "tick interval must be greater than zero"));
        }
        if let (Some(next), Some(old)) = (self.next, self.interval) {
            // Re-anchor on the last tick boundary, not on "now".
            self.next = Some(next - old + seconds);
        }
        self.interval = Some(seconds);
        Ok(())
    }

    /// Whether a tick is due; advances the deadline when it is.
    fn due(&mut self) -> bool {
        let (Some(next), Some(interval)) = (self.next, self.interval) else {
            return false;
        };
        let now = monotonic_timestamp();
        if now < next {
            return false;
        }
        let mut upcoming = next + interval;
        if upcoming < now {
            // Fell behind; skip the missed ticks instead of replaying them.
            upcoming = now + interval;
        }
        self.next = Some(upcoming);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_fire_one_interval_after_arming() {
        let ticks = Ticks::new(Some(0.05), true);
        let timeout = ticks.wait_timeout().unwrap();
        assert!(timeout <= Duration::from_millis(50));
        assert!(timeout > Duration::from_millis(30));
    }

    #[test]
    fn paused_ticks_wait_forever() {
        let ticks = Ticks::new(Some(0.05), false);
        assert!(ticks.wait_timeout().is_none());
    }

    #[test]
    fn due_advances_the_deadline() {
        let mut ticks = Ticks::new(Some(0.01), true);
        assert!(!ticks.due());
        std::thread::sleep(Duration::from_millis(15));
        assert!(ticks.due());
        assert!(!ticks.due());
    }

    #[test]
    fn set_interval_reanchors_on_last_boundary() {
        let mut ticks = Ticks::new(Some(10.0), true);
        let before = ticks.next.unwrap();
        ticks.set_interval(20.0, "t").unwrap();
        let after = ticks.next.unwrap();
        assert!((after - before - 10.0).abs() < 0.5);
    }

    #[test]
    fn resume_requires_an_interval() {
        let mut ticks = Ticks::new(None, false);
        assert!(ticks.resume("t").is_err());
    }
}
