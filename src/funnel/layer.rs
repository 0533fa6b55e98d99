//! The `tracing` layer that feeds the funnel.
//!
//! One layer serves both roles: in the parent it starts out writing directly
//! to the configured sinks and is re-routed onto the inter-process log buffer
//! while the funnel is active; in workers it is installed already routed at
//! the queue. Suppressed levels are dropped before any serialisation.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};

use super::config::LevelTable;
use super::record::LogRecord;
use super::sink::SinkSet;
use crate::buffer::Publisher;

/// Where records currently go.
pub(crate) enum Route {
    /// Straight to the sinks (no funnel active, or this is the listener).
    Direct(SinkSet),
    /// Onto the inter-process log buffer, towards the listener.
    Queue(Publisher<LogRecord>),
}

pub(crate) type SharedRoute = Arc<Mutex<Route>>;

/// Layer capturing events into [`LogRecord`]s and forwarding them along the
/// current route.
pub(crate) struct RouteLayer {
    filter: LevelTable,
    source: String,
    route: SharedRoute,
}

impl RouteLayer {
    pub(crate) fn new(filter: LevelTable, source: String, route: SharedRoute) -> Self {
        Self {
            filter,
            source,
            route,
        }
    }
}

impl<S: tracing::Subscriber> Layer<S> for RouteLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = metadata.level().into();
        if !self.filter.enabled(metadata.target(), level) {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            timestamp: wall_clock_seconds(),
            level,
            target: metadata.target().to_string(),
            message: visitor.into_message(),
            source: self.source.clone(),
            pid: std::process::id(),
        };
        match &mut *self.route.lock().expect("log route lock poisoned") {
            Route::Direct(sinks) => sinks.dispatch(&record),
            // Never block, and never log about logging: drop on a full queue.
            Route::Queue(publisher) => {
                let _ = publisher.try_publish_value(record);
            }
        }
    }
}

fn wall_clock_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 * 1e-6
}

/// Flattens an event's fields into one message string: the `message` field
/// first, remaining fields appended as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    extras: String,
}

impl MessageVisitor {
    fn into_message(self) -> String {
        if self.message.is_empty() {
            self.extras.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.extras)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.extras, " {}={:?}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.extras, " {}={}", field.name(), value);
        }
    }
}
