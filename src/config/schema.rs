//! Configuration schema definitions.
//!
//! This module defines the configuration snapshot consumed by the proxy.
//! Keys are camelCase to match the JSON document on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_CAPTURE_LIMIT;
use crate::observability::LogLevel;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Route key (`domain` or `domain:/path`) → route.
    pub routes: HashMap<String, RouteConfig>,

    /// Process-wide settings.
    pub global: GlobalConfig,
}

/// A single domain (and optional path) → target rule.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    /// Target origin, e.g. `http://localhost:3001`.
    pub target: String,

    /// Path prefix to match when the key carries none.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Replacement for the matched prefix. `Some("")` strips it.
    #[serde(default)]
    pub path_replace: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Log level override for this route's domain.
    #[serde(default)]
    pub log_level: Option<LogLevel>,

    #[serde(default)]
    pub log_request_headers: Option<bool>,
    #[serde(default)]
    pub log_request_body: Option<bool>,
    #[serde(default)]
    pub log_response_headers: Option<bool>,
    #[serde(default)]
    pub log_response_body: Option<bool>,
}

fn default_enabled() -> bool {
    true
}

impl RouteConfig {
    /// A minimal enabled route to `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            path_prefix: None,
            path_replace: None,
            enabled: true,
            log_level: None,
            log_request_headers: None,
            log_request_body: None,
            log_response_headers: None,
            log_response_body: None,
        }
    }

    /// Effective capture flags: route overrides, else global defaults.
    pub fn capture_flags(&self, global: &GlobalConfig) -> CaptureFlags {
        CaptureFlags {
            request_headers: self.log_request_headers.unwrap_or(global.log_request_headers),
            request_body: self.log_request_body.unwrap_or(global.log_request_body),
            response_headers: self.log_response_headers.unwrap_or(global.log_response_headers),
            response_body: self.log_response_body.unwrap_or(global.log_response_body),
        }
    }
}

/// Which request/response details are recorded for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureFlags {
    pub request_headers: bool,
    pub request_body: bool,
    pub response_headers: bool,
    pub response_body: bool,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Listen host for the proxy.
    pub host: String,

    /// Listen port for the proxy.
    pub port: u16,

    pub logging: LoggingConfig,

    pub tracing: TracingConfig,

    pub log_request_headers: bool,
    pub log_request_body: bool,
    pub log_response_headers: bool,
    pub log_response_body: bool,

    pub log_rotation: LogRotationConfig,

    /// Upstream connection pools.
    pub pool: PoolConfig,

    /// Upstream connect + response deadline in milliseconds.
    pub upstream_timeout_ms: u64,

    /// Bytes of each body kept for logging.
    pub body_capture_limit: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            logging: LoggingConfig::default(),
            tracing: TracingConfig::default(),
            log_request_headers: false,
            log_request_body: false,
            log_response_headers: false,
            log_response_body: false,
            log_rotation: LogRotationConfig::default(),
            pool: PoolConfig::default(),
            upstream_timeout_ms: 30_000,
            body_capture_limit: DEFAULT_CAPTURE_LIMIT,
        }
    }
}

impl GlobalConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

/// Logging pipeline settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Global level (`none`, `error`, `warn`, `info`, `debug`).
    pub level: LogLevel,

    /// NDJSON log file; rotation per `logRotation`.
    pub file: Option<PathBuf>,

    /// Mirror entries to the process console.
    pub console: bool,

    /// Per-domain level overrides (exact or `*.suffix`).
    pub domains: HashMap<String, LogLevel>,

    /// Bind address of the log stream endpoint; `null` disables it.
    pub stream_address: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            console: true,
            domains: HashMap::new(),
            stream_address: Some("127.0.0.1:9901".to_string()),
        }
    }
}

/// Trace correlation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TracingConfig {
    /// Reuse inbound correlation headers as the trace id.
    pub trust_incoming: bool,

    /// How long finished traces stay queryable.
    pub retention_secs: u64,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            trust_incoming: true,
            retention_secs: 60,
        }
    }
}

/// Size-based log file rotation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogRotationConfig {
    /// Rotate before a write would push the file past this many bytes.
    pub max_file_size: u64,

    /// Numbered backups to keep.
    pub max_files: usize,

    /// Accepted for compatibility; rotated files are not compressed.
    pub compress: bool,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024, // 10MB
            max_files: 5,
            compress: false,
        }
    }
}

/// Upstream connection pool limits, applied per pool (plain and TLS).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Concurrent upstream exchanges allowed.
    pub max_sockets: usize,

    /// Idle keep-alive connections kept per host.
    pub max_idle_sockets: usize,

    /// Idle connection lifetime in milliseconds.
    pub idle_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets: 256,
            max_idle_sockets: 64,
            idle_timeout_ms: 30_000,
        }
    }
}
