//! Log records and levels as they travel through the funnel.

use serde::{Deserialize, Serialize};

/// Severity of a [`LogRecord`]. Ordered most-severe-first, so
/// `record.level <= threshold` is the enabled check.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum LogLevel {
    /// Unrecoverable or surfaced-at-teardown problems.
    Error,
    /// Discards, overflow, swallowed teardown errors.
    Warn,
    /// High-level lifecycle.
    Info,
    /// Per-operation chatter.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Parses the usual level names, case-insensitively. Unknown names fall
    /// back to `Info`.
    pub fn parse(name: &str) -> LogLevel {
        match name.to_ascii_uppercase().as_str() {
            "ERROR" | "CRITICAL" => LogLevel::Error,
            "WARN" | "WARNING" => LogLevel::Warn,
            "INFO" => LogLevel::Info,
            "DEBUG" => LogLevel::Debug,
            "TRACE" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::TRACE => LogLevel::Trace,
        }
    }
}

/// One log event, flattened for the trip across process boundaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock seconds since the Unix epoch, for display.
    pub timestamp: f64,
    /// Severity.
    pub level: LogLevel,
    /// Module path / target of the event.
    pub target: String,
    /// Rendered message, including any structured fields.
    pub message: String,
    /// Name of the worker (or parent) the record came from.
    pub source: String,
    /// Operating-system process id of the source.
    pub pid: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Info);
    }

    #[test]
    fn severity_ordering_is_most_severe_first() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Info <= LogLevel::Debug);
        // A WARN record passes an INFO threshold, a DEBUG record does not.
        assert!(LogLevel::Warn <= LogLevel::Info);
        assert!(LogLevel::Debug > LogLevel::Info);
    }
}
