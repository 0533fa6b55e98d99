//! # Log configuration document.
//!
//! A [`LogConfig`] is the structured document accepted at initialisation:
//! named formatters, filters, handlers and loggers plus the root logger, in
//! the shape most logging stacks converge on. Two profiles are provided:
//! [`LogConfig::development`] (console only) and [`LogConfig::production`]
//! (console plus a midnight-rotated file with 30-day retention).
//!
//! ```
//! use puma::funnel::LogConfig;
//!
//! let parsed: LogConfig = serde_json::from_str(
//!     r#"{
//!         "version": 1,
//!         "formatters": { "plain": { "format": "%(levelname)s %(name)s: %(message)s" } },
//!         "handlers": { "console": { "class": "console", "level": "DEBUG", "formatter": "plain" } },
//!         "loggers": { "puma": { "level": "WARN", "handlers": [], "propagate": true } },
//!         "root": { "level": "INFO", "handlers": ["console"] }
//!     }"#,
//! )
//! .unwrap();
//! assert_eq!(parsed.version, 1);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::record::LogLevel;

/// Structured logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    /// Schema version; currently always 1.
    pub version: u32,
    /// Named format templates.
    #[serde(default)]
    pub formatters: BTreeMap<String, FormatterConfig>,
    /// Named record filters.
    #[serde(default)]
    pub filters: BTreeMap<String, FilterConfig>,
    /// Named sinks.
    #[serde(default)]
    pub handlers: BTreeMap<String, HandlerConfig>,
    /// Per-logger overrides, keyed by dotted logger name.
    #[serde(default)]
    pub loggers: BTreeMap<String, LoggerConfig>,
    /// The root logger: its handlers receive everything that passes.
    pub root: LoggerConfig,
    /// Whether loggers not named in the document are silenced.
    #[serde(default)]
    pub disable_existing_loggers: bool,
}

/// A format template. Tokens: `%(asctime)s`, `%(levelname)s`, `%(name)s`,
/// `%(message)s`, `%(process)d`, `%(processName)s`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Template string.
    pub format: String,
    /// strftime format for `%(asctime)s`; RFC 3339-like when omitted.
    #[serde(default)]
    pub datefmt: Option<String>,
}

/// A record filter: passes records whose target starts with `prefix`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Dotted target prefix.
    pub prefix: String,
}

/// Kind of sink a handler writes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerClass {
    /// A console stream (`stream`: "stdout" or "stderr", default stderr).
    Console,
    /// A file rotated at midnight UTC (`filename`, `backup_days`).
    TimedRotatingFile,
}

/// One configured sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// What the handler writes to.
    pub class: HandlerClass,
    /// Minimum severity; defaults to the root level.
    #[serde(default)]
    pub level: Option<String>,
    /// Formatter name; a plain default is used when omitted.
    #[serde(default)]
    pub formatter: Option<String>,
    /// Console stream name ("stdout"/"stderr").
    #[serde(default)]
    pub stream: Option<String>,
    /// Target file for file handlers.
    #[serde(default)]
    pub filename: Option<PathBuf>,
    /// Days of rotated files to retain.
    #[serde(default)]
    pub backup_days: Option<u32>,
    /// Names of filters that must pass.
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Level and handler wiring of one logger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Minimum severity for this logger subtree.
    #[serde(default)]
    pub level: Option<String>,
    /// Handler names (only meaningful on `root` in this implementation).
    #[serde(default)]
    pub handlers: Vec<String>,
    /// Whether records continue to the root handlers.
    #[serde(default = "default_propagate")]
    pub propagate: bool,
}

fn default_propagate() -> bool {
    true
}

/// Level thresholds replicated into worker processes, so suppressed records
/// are never serialised or enqueued.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LevelTable {
    root: LogLevel,
    /// Dotted logger-name prefixes with their thresholds.
    loggers: Vec<(String, LogLevel)>,
}

impl LevelTable {
    /// Whether a record at `level` from `target` passes.
    pub fn enabled(&self, target: &str, level: LogLevel) -> bool {
        level <= self.threshold(target)
    }

    fn threshold(&self, target: &str) -> LogLevel {
        let mut best: Option<(usize, LogLevel)> = None;
        for (prefix, level) in &self.loggers {
            if !target_matches(target, prefix) {
                continue;
            }
            if best.map_or(true, |(len, _)| prefix.len() > len) {
                best = Some((prefix.len(), *level));
            }
        }
        best.map(|(_, level)| level).unwrap_or(self.root)
    }
}

/// Prefix match on dotted / double-colon separated target names.
fn target_matches(target: &str, prefix: &str) -> bool {
    if !target.starts_with(prefix) {
        return false;
    }
    match target.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'.') | Some(b':') => true,
        Some(_) => false,
    }
}

impl LogConfig {
    /// Console-only profile for development work: everything at `DEBUG` to
    /// stderr.
    pub fn development() -> Self {
        let mut handlers = BTreeMap::new();
        handlers.insert(
            "console".to_string(),
            HandlerConfig {
                class: HandlerClass::Console,
                level: Some("DEBUG".to_string()),
                formatter: Some("plain".to_string()),
                stream: Some("stderr".to_string()),
                filename: None,
                backup_days: None,
                filters: Vec::new(),
            },
        );
        let mut formatters = BTreeMap::new();
        formatters.insert(
            "plain".to_string(),
            FormatterConfig {
                format: "%(asctime)s %(levelname)s [%(processName)s] %(name)s: %(message)s"
                    .to_string(),
                datefmt: None,
            },
        );
        Self {
            version: 1,
            formatters,
            filters: BTreeMap::new(),
            handlers,
            loggers: BTreeMap::new(),
            root: LoggerConfig {
                level: Some("DEBUG".to_string()),
                handlers: vec!["console".to_string()],
                propagate: true,
            },
            disable_existing_loggers: false,
        }
    }

    /// Production profile: console at `INFO` plus a file at `path` rotated at
    /// midnight UTC with 30 days of retention.
    pub fn production(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::development();
        if let Some(console) = config.handlers.get_mut("console") {
            console.level = Some("INFO".to_string());
        }
        config.formatters.insert(
            "file".to_string(),
            FormatterConfig {
                format:
                    "%(asctime)s %(levelname)s [%(process)d %(processName)s] %(name)s: %(message)s"
                        .to_string(),
                datefmt: Some("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()),
            },
        );
        config.handlers.insert(
            "file".to_string(),
            HandlerConfig {
                class: HandlerClass::TimedRotatingFile,
                level: Some("INFO".to_string()),
                formatter: Some("file".to_string()),
                stream: None,
                filename: Some(path.into()),
                backup_days: Some(30),
                filters: Vec::new(),
            },
        );
        config.root = LoggerConfig {
            level: Some("INFO".to_string()),
            handlers: vec!["console".to_string(), "file".to_string()],
            propagate: true,
        };
        config
    }

    /// The root threshold.
    pub(crate) fn root_level(&self) -> LogLevel {
        self.root
            .level
            .as_deref()
            .map(LogLevel::parse)
            .unwrap_or(LogLevel::Info)
    }

    /// Builds the compact threshold table replicated into workers.
    pub(crate) fn level_table(&self) -> LevelTable {
        let loggers = self
            .loggers
            .iter()
            .filter_map(|(name, logger)| {
                logger
                    .level
                    .as_deref()
                    .map(|level| (name.clone(), LogLevel::parse(level)))
            })
            .collect();
        LevelTable {
            root: self.root_level(),
            loggers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_have_expected_handlers() {
        let dev = LogConfig::development();
        assert!(dev.handlers.contains_key("console"));
        assert_eq!(dev.root.handlers, vec!["console"]);

        let prod = LogConfig::production("/var/log/app.log");
        assert_eq!(prod.handlers["file"].class, HandlerClass::TimedRotatingFile);
        assert_eq!(prod.handlers["file"].backup_days, Some(30));
        assert_eq!(prod.root.handlers.len(), 2);
    }

    #[test]
    fn config_round_trips_through_json() {
        let prod = LogConfig::production("logs/app.log");
        let json = serde_json::to_string(&prod).unwrap();
        let back: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.handlers.len(), prod.handlers.len());
        assert_eq!(back.root.handlers, prod.root.handlers);
    }

    #[test]
    fn level_table_prefers_longest_prefix() {
        let mut config = LogConfig::development();
        config.loggers.insert(
            "app".to_string(),
            LoggerConfig {
                level: Some("WARN".to_string()),
                handlers: Vec::new(),
                propagate: true,
            },
        );
        config.loggers.insert(
            "app.pipeline".to_string(),
            LoggerConfig {
                level: Some("TRACE".to_string()),
                handlers: Vec::new(),
                propagate: true,
            },
        );
        let table = config.level_table();
        assert!(!table.enabled("app.other", LogLevel::Debug));
        assert!(table.enabled("app.pipeline.stage", LogLevel::Trace));
        assert!(table.enabled("unrelated", LogLevel::Debug));
        // Prefixes only match on name boundaries.
        assert!(table.enabled("application", LogLevel::Debug));
    }
}
