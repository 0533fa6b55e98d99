//! Sinks: where the listener writes records.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::warn;

use super::config::{FilterConfig, FormatterConfig, HandlerClass, LogConfig};
use super::record::{LogLevel, LogRecord};

/// A compiled format template.
pub(crate) struct Formatter {
    format: String,
    datefmt: Option<String>,
}

impl Formatter {
    fn plain() -> Self {
        Self {
            format: "%(asctime)s %(levelname)s %(name)s: %(message)s".to_string(),
            datefmt: None,
        }
    }

    fn from_config(config: &FormatterConfig) -> Self {
        Self {
            format: config.format.clone(),
            datefmt: config.datefmt.clone(),
        }
    }

    pub(crate) fn render(&self, record: &LogRecord) -> String {
        let when = timestamp_to_datetime(record.timestamp);
        let asctime = match &self.datefmt {
            Some(datefmt) => when.format(datefmt).to_string(),
            None => when.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };
        self.format
            .replace("%(asctime)s", &asctime)
            .replace("%(levelname)s", record.level.as_str())
            .replace("%(name)s", &record.target)
            .replace("%(process)d", &record.pid.to_string())
            .replace("%(processName)s", &record.source)
            .replace("%(message)s", &record.message)
    }
}

fn timestamp_to_datetime(timestamp: f64) -> DateTime<Utc> {
    let secs = timestamp.floor() as i64;
    let nanos = ((timestamp - secs as f64) * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
}

enum SinkKind {
    Stdout,
    Stderr,
    File(RotatingFile),
}

struct SinkBinding {
    level: LogLevel,
    filters: Vec<String>,
    formatter: Formatter,
    kind: SinkKind,
}

/// The compiled sink set of one configuration.
pub(crate) struct SinkSet {
    bindings: Vec<SinkBinding>,
    filters: BTreeMap<String, FilterConfig>,
}

impl SinkSet {
    /// Compiles the root handlers of `config`. Misconfigured handlers are
    /// skipped with a warning rather than failing the listener.
    pub(crate) fn from_config(config: &LogConfig) -> Self {
        let mut bindings = Vec::new();
        for handler_name in &config.root.handlers {
            let Some(handler) = config.handlers.get(handler_name) else {
                warn!(handler = %handler_name, "log handler is not defined; skipping");
                continue;
            };
            let formatter = handler
                .formatter
                .as_ref()
                .and_then(|name| config.formatters.get(name))
                .map(Formatter::from_config)
                .unwrap_or_else(Formatter::plain);
            let level = handler
                .level
                .as_deref()
                .map(LogLevel::parse)
                .unwrap_or_else(|| config.root_level());
            let kind = match handler.class {
                HandlerClass::Console => match handler.stream.as_deref() {
                    Some("stdout") => SinkKind::Stdout,
                    _ => SinkKind::Stderr,
                },
                HandlerClass::TimedRotatingFile => {
                    let Some(path) = handler.filename.clone() else {
                        warn!(handler = %handler_name, "file handler without filename; skipping");
                        continue;
                    };
                    match RotatingFile::open(path, handler.backup_days.unwrap_or(30)) {
                        Ok(file) => SinkKind::File(file),
                        Err(err) => {
                            warn!(handler = %handler_name, error = %err, "cannot open log file; skipping");
                            continue;
                        }
                    }
                }
            };
            bindings.push(SinkBinding {
                level,
                filters: handler.filters.clone(),
                formatter,
                kind,
            });
        }
        Self {
            bindings,
            filters: config.filters.clone(),
        }
    }

    /// Writes `record` to every binding it passes.
    pub(crate) fn dispatch(&mut self, record: &LogRecord) {
        for binding in &mut self.bindings {
            if record.level > binding.level {
                continue;
            }
            if !binding.filters.is_empty() {
                let passes = binding.filters.iter().any(|name| {
                    self.filters
                        .get(name)
                        .map(|filter| {
                            record.target == filter.prefix
                                || record
                                    .target
                                    .strip_prefix(filter.prefix.as_str())
                                    .map_or(false, |rest| {
                                        rest.starts_with('.') || rest.starts_with(':')
                                    })
                        })
                        .unwrap_or(false)
                });
                if !passes {
                    continue;
                }
            }
            let line = binding.formatter.render(record);
            match &mut binding.kind {
                SinkKind::Stdout => {
                    let _ = writeln!(std::io::stdout(), "{line}");
                }
                SinkKind::Stderr => {
                    let _ = writeln!(std::io::stderr(), "{line}");
                }
                SinkKind::File(file) => file.write_line(&line),
            }
        }
    }
}

/// A file rotated at midnight UTC, keeping a bounded number of dated copies.
struct RotatingFile {
    path: PathBuf,
    backup_days: u32,
    current_day: NaiveDate,
    file: File,
}

impl RotatingFile {
    fn open(path: PathBuf, backup_days: u32) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            backup_days,
            current_day: Utc::now().date_naive(),
            file,
        })
    }

    fn write_line(&mut self, line: &str) {
        let today = Utc::now().date_naive();
        if today != self.current_day {
            self.rotate(today);
        }
        let _ = writeln!(self.file, "{line}");
    }

    fn rotate(&mut self, today: NaiveDate) {
        let rotated = rotated_name(&self.path, self.current_day);
        if let Err(err) = std::fs::rename(&self.path, &rotated) {
            warn!(error = %err, "log rotation rename failed");
        }
        self.prune(today);
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => {
                self.file = file;
                self.current_day = today;
            }
            Err(err) => {
                warn!(error = %err, "cannot reopen log file after rotation");
            }
        }
    }

    fn prune(&self, today: NaiveDate) {
        let Some(dir) = self.path.parent() else {
            return;
        };
        let Some(base) = self.path.file_name().and_then(|name| name.to_str()) else {
            return;
        };
        let Ok(entries) = std::fs::read_dir(if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        }) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(base).and_then(|s| s.strip_prefix('.')) else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(suffix, "%Y-%m-%d") else {
                continue;
            };
            let age = today.signed_duration_since(date).num_days();
            if age > self.backup_days as i64 {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}

fn rotated_name(path: &Path, day: NaiveDate) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", day.format("%Y-%m-%d")));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: LogLevel, target: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: 1_700_000_000.5,
            level,
            target: target.to_string(),
            message: message.to_string(),
            source: "worker-1".to_string(),
            pid: 4242,
        }
    }

    #[test]
    fn formatter_substitutes_all_tokens() {
        let formatter = Formatter {
            format: "%(asctime)s %(levelname)s [%(process)d %(processName)s] %(name)s: %(message)s"
                .to_string(),
            datefmt: Some("%Y-%m-%d".to_string()),
        };
        let line = formatter.render(&record(LogLevel::Warn, "app.stage", "queue full"));
        assert_eq!(line, "2023-11-14 WARN [4242 worker-1] app.stage: queue full");
    }

    #[test]
    fn rotated_names_carry_the_date() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            rotated_name(Path::new("logs/app.log"), day),
            PathBuf::from("logs/app.log.2024-03-01")
        );
    }

    #[test]
    fn file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut file = RotatingFile::open(path.clone(), 30).unwrap();
        file.write_line("first");
        file.write_line("second");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[test]
    fn prune_removes_only_expired_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let stale = dir.path().join("app.log.2020-01-01");
        let fresh_day = Utc::now().date_naive();
        let fresh = rotated_name(&path, fresh_day);
        std::fs::write(&stale, "old").unwrap();
        std::fs::write(&fresh, "new").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        let file = RotatingFile::open(path, 30).unwrap();
        file.prune(fresh_day);

        assert!(!stale.exists(), "expired backup should be pruned");
        assert!(fresh.exists(), "fresh backup should remain");
        assert!(dir.path().join("unrelated.txt").exists());
    }
}
