//! Structured audit logging.
//!
//! # Responsibilities
//! - Rank log levels and resolve the effective level per domain
//! - Build immutable [`LogEntry`] records
//! - Fan each accepted entry out to the history buffer, the rotating file,
//!   live stream subscribers and the process console
//! - Compose the per-request summary and detail entries
//!
//! # Data Flow
//! ```text
//! Logger::log(level, message, trace_id, domain?, data?)
//!     → LevelTable (domain override, else global)  ── rejected → no-op
//!     → LogBuffer::push          (bounded history)
//!     → RotatingFileWriter       (JSON line, errors swallowed)
//!     → SubscriberSet::broadcast (try_send, slow subscribers dropped)
//!     → tracing event            (console, if enabled)
//! ```
//!
//! # Design Decisions
//! - Levels are swapped atomically on reload, never mutated in place
//! - Every sink is best-effort; logging never fails the caller
//! - Console output goes through `tracing` so the process subscriber formats it

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{CaptureFlags, ProxyConfig};
use crate::observability::buffer::{LogBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::observability::rotation::{RotatingFileWriter, RotationConfig};
use crate::observability::sanitize::mask_error;
use crate::observability::stream::{StreamFilter, SubscriberSet, Subscription};
use crate::observability::trace::RequestTrace;
use crate::routing::{DomainMatcher, RouteKey};

/// Console target for audit entries.
pub const CONSOLE_TARGET: &str = "audit_proxy::log";

/// Trace id used for entries not tied to a request.
pub const SYSTEM_TRACE_ID: &str = "system";

/// Ranked log level. A sink at level L accepts entries ranked at or below L.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// Whether a sink at `self` accepts an entry at `level`.
    pub fn accepts(self, level: LogLevel) -> bool {
        level != LogLevel::None && level <= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::None => "none",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LogLevel::None),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// One audit record. Serialized flat, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub trace_id: String,
    pub domain: Option<String>,
    pub message: String,
    pub data: Option<Value>,
    /// Process-local sequence number, used to de-duplicate history and live delivery.
    #[serde(skip)]
    pub seq: u64,
}

/// Global level plus per-domain overrides.
#[derive(Debug, Clone, Default)]
pub struct LevelTable {
    global: LogLevel,
    overrides: Vec<(DomainMatcher, LogLevel)>,
}

impl LevelTable {
    pub fn new(global: LogLevel) -> Self {
        Self {
            global,
            overrides: Vec::new(),
        }
    }

    /// Add an override for an exact or `*.suffix` domain pattern.
    pub fn with_override(mut self, pattern: &str, level: LogLevel) -> Self {
        if let Some(matcher) = DomainMatcher::parse(pattern) {
            self.overrides.push((matcher, level));
        }
        self
    }

    /// Build from `global.logging` plus route `logLevel` fields.
    ///
    /// Explicit `logging.domains` entries win over route-derived ones.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let mut table = Self::new(config.global.logging.level);
        let mut seen = HashSet::new();

        for (pattern, level) in &config.global.logging.domains {
            seen.insert(pattern.to_ascii_lowercase());
            table = table.with_override(pattern, *level);
        }
        for (key, route) in &config.routes {
            let (Some(level), Ok(parsed)) = (route.log_level, RouteKey::parse(key)) else {
                continue;
            };
            let pattern = parsed.domain.to_string();
            if seen.insert(pattern.clone()) {
                table = table.with_override(&pattern, level);
            }
        }
        table
    }

    /// Effective level for an entry's domain. The best-scoring override wins.
    pub fn level_for(&self, domain: Option<&str>) -> LogLevel {
        let Some(domain) = domain else {
            return self.global;
        };
        let domain = domain.to_ascii_lowercase();
        self.overrides
            .iter()
            .filter_map(|(matcher, level)| matcher.score(&domain).map(|s| (s, *level)))
            .max_by_key(|(score, _)| *score)
            .map(|(_, level)| level)
            .unwrap_or(self.global)
    }
}

/// Audit logger shared by the proxy, the stream endpoint and reload handling.
pub struct Logger {
    levels: ArcSwap<LevelTable>,
    buffer: LogBuffer,
    file: Option<RotatingFileWriter>,
    subscribers: Arc<SubscriberSet>,
    console: AtomicBool,
    seq: AtomicU64,
}

impl Logger {
    pub fn new(levels: LevelTable, file: Option<RotatingFileWriter>, console: bool) -> Self {
        Self {
            levels: ArcSwap::from_pointee(levels),
            buffer: LogBuffer::new(DEFAULT_BUFFER_CAPACITY),
            file,
            subscribers: Arc::new(SubscriberSet::new()),
            console: AtomicBool::new(console),
            seq: AtomicU64::new(0),
        }
    }

    /// Build from configuration. A log file that cannot be opened disables
    /// file output instead of failing startup.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let logging = &config.global.logging;
        let file = logging.file.as_ref().and_then(|path| {
            let rotation = RotationConfig::from_settings(path, &config.global.log_rotation);
            match RotatingFileWriter::open(rotation) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Log file unavailable, file logging disabled");
                    None
                }
            }
        });
        Self::new(LevelTable::from_config(config), file, logging.console)
    }

    /// Swap levels after a configuration change.
    pub fn update_levels(&self, config: &ProxyConfig) {
        self.levels.store(Arc::new(LevelTable::from_config(config)));
        self.console
            .store(config.global.logging.console, Ordering::Relaxed);
    }

    /// Effective level for a domain.
    pub fn level_for(&self, domain: Option<&str>) -> LogLevel {
        self.levels.load().level_for(domain)
    }

    /// Record one entry. Returns the entry when it was accepted.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        trace_id: &str,
        domain: Option<&str>,
        data: Option<Value>,
    ) -> Option<Arc<LogEntry>> {
        if !self.level_for(domain).accepts(level) {
            return None;
        }

        let entry = Arc::new(LogEntry {
            timestamp: Utc::now(),
            level,
            trace_id: trace_id.to_string(),
            domain: domain.map(str::to_string),
            message: message.into(),
            data,
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
        });

        self.buffer.push(entry.clone());

        if let Some(file) = &self.file {
            match serde_json::to_string(entry.as_ref()) {
                Ok(line) => {
                    if let Err(e) = file.write_line(&line) {
                        tracing::warn!(error = %e, "Failed to write log file");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to serialize log entry"),
            }
        }

        self.subscribers.broadcast(&entry);

        if self.console.load(Ordering::Relaxed) {
            emit_console(&entry);
        }

        Some(entry)
    }

    /// Emit the summary line for a finished request plus the enabled detail entries.
    pub fn log_request(&self, trace: &RequestTrace, flags: CaptureFlags) {
        let status = trace.status_code.unwrap_or(0);
        let level = if status >= 500 || trace.error.is_some() {
            LogLevel::Error
        } else if status >= 400 {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };

        let target = trace.target.as_deref().unwrap_or("-");
        let duration = trace.duration_ms.unwrap_or(0);
        let mut message = format!(
            "{} {} -> {} {} ({}ms)",
            trace.method, trace.url, target, status, duration
        );
        let error = trace.error.as_deref().map(mask_error);
        if let Some(error) = &error {
            message.push_str(" error: ");
            message.push_str(error);
        }

        let domain = trace.domain.as_deref();
        let id = trace.id.as_str();
        self.log(
            level,
            message,
            id,
            domain,
            Some(json!({
                "method": trace.method,
                "url": trace.url,
                "target": trace.target,
                "statusCode": trace.status_code,
                "durationMs": trace.duration_ms,
                "error": error,
            })),
        );

        if flags.request_headers {
            self.log(
                level,
                "Request headers",
                id,
                domain,
                Some(json!(trace.request_headers)),
            );
        }
        if flags.request_body {
            if let Some(body) = &trace.request_body {
                self.log(level, "Request body", id, domain, Some(body.clone()));
            }
        }
        if flags.response_headers {
            if let Some(headers) = &trace.response_headers {
                self.log(level, "Response headers", id, domain, Some(json!(headers)));
            }
        }
        if flags.response_body {
            if let Some(body) = &trace.response_body {
                self.log(level, "Response body", id, domain, Some(body.clone()));
            }
        }
    }

    /// Register a live subscriber, optionally seeded with buffered history.
    pub fn subscribe(&self, filter: StreamFilter, include_history: bool) -> Subscription {
        // Register before the snapshot so nothing falls between the two;
        // entries seen in both are delivered once.
        let subscription = SubscriberSet::subscribe(&self.subscribers, filter.clone());
        let history = if include_history {
            self.buffer.snapshot(|entry| filter.accepts(entry))
        } else {
            Vec::new()
        };
        subscription.with_history(history)
    }

    /// Buffered entries matching `filter`, oldest first.
    pub fn history(&self, filter: &StreamFilter) -> Vec<Arc<LogEntry>> {
        self.buffer.snapshot(|entry| filter.accepts(entry))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop buffered history and disconnect subscribers.
    pub fn clear(&self) {
        self.buffer.clear();
        self.subscribers.clear();
    }
}

fn emit_console(entry: &LogEntry) {
    let domain = entry.domain.as_deref().unwrap_or("-");
    let trace_id = entry.trace_id.as_str();
    let message = entry.message.as_str();
    match entry.level {
        LogLevel::Error => tracing::error!(target: CONSOLE_TARGET, trace_id, domain, "{message}"),
        LogLevel::Warn => tracing::warn!(target: CONSOLE_TARGET, trace_id, domain, "{message}"),
        LogLevel::Info => tracing::info!(target: CONSOLE_TARGET, trace_id, domain, "{message}"),
        LogLevel::Debug => tracing::debug!(target: CONSOLE_TARGET, trace_id, domain, "{message}"),
        LogLevel::None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::observability::stream::StreamFilter;

    fn quiet_logger(level: LogLevel) -> Logger {
        Logger::new(LevelTable::new(level), None, false)
    }

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Debug.accepts(LogLevel::Error));
        assert!(LogLevel::Info.accepts(LogLevel::Warn));
        assert!(!LogLevel::Info.accepts(LogLevel::Debug));
        assert!(!LogLevel::None.accepts(LogLevel::Error));
        assert!(!LogLevel::Debug.accepts(LogLevel::None));
        assert_eq!("WARN".parse::<LogLevel>(), Ok(LogLevel::Warn));
    }

    #[test]
    fn domain_override_takes_precedence() {
        let table = LevelTable::new(LogLevel::Warn)
            .with_override("*.dev.local", LogLevel::Debug)
            .with_override("quiet.dev.local", LogLevel::None);

        assert_eq!(table.level_for(None), LogLevel::Warn);
        assert_eq!(table.level_for(Some("other.local")), LogLevel::Warn);
        assert_eq!(table.level_for(Some("x.dev.local")), LogLevel::Debug);
        assert_eq!(table.level_for(Some("Quiet.Dev.Local")), LogLevel::None);
    }

    #[test]
    fn route_log_level_becomes_domain_override() {
        let mut config = ProxyConfig::default();
        let mut route = RouteConfig::new("http://localhost:3001");
        route.log_level = Some(LogLevel::Error);
        config.routes.insert("api.local:/v1".into(), route);

        let table = LevelTable::from_config(&config);
        assert_eq!(table.level_for(Some("api.local")), LogLevel::Error);
        assert_eq!(table.level_for(Some("web.local")), LogLevel::Info);
    }

    #[test]
    fn rejected_entries_are_not_recorded() {
        let logger = quiet_logger(LogLevel::Warn);
        assert!(logger.log(LogLevel::Info, "hidden", "t1", None, None).is_none());
        assert!(logger.log(LogLevel::Error, "shown", "t1", None, None).is_some());

        let history = logger.history(&StreamFilter::default());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "shown");
    }

    #[test]
    fn entry_serializes_flat() {
        let logger = quiet_logger(LogLevel::Debug);
        let entry = logger
            .log(LogLevel::Info, "hello", "abc", Some("api.local"), Some(json!({"k": 1})))
            .unwrap();
        let value = serde_json::to_value(entry.as_ref()).unwrap();
        let object = value.as_object().unwrap();

        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, ["data", "domain", "level", "message", "timestamp", "traceId"]);
        assert_eq!(object["level"], "info");
        assert_eq!(object["traceId"], "abc");
    }

    #[test]
    fn file_sink_receives_json_lines() {
        let dir = std::env::temp_dir().join(format!("audit-proxy-logger-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("audit.log");

        let mut config = ProxyConfig::default();
        config.global.logging.file = Some(path.clone());
        config.global.logging.console = false;
        let logger = Logger::from_config(&config);

        logger.log(LogLevel::Info, "one", "t", None, None);
        logger.log(LogLevel::Warn, "two", "t", None, None);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<LogEntry> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].message, "two");
        assert_eq!(lines[1].level, LogLevel::Warn);
    }
}
