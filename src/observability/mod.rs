//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy pipeline produces:
//!     → trace.rs (correlation id + RequestTrace per request)
//!     → sanitize.rs (masked headers and errors)
//!     → logging.rs (level-filtered LogEntry)
//!
//! Consumers of each LogEntry:
//!     → buffer.rs (last 1000 entries, history replay)
//!     → rotation.rs (NDJSON file, size-based rollover)
//!     → stream.rs (live subscribers, per-client filters)
//!     → console (tracing events)
//! ```
//!
//! # Design Decisions
//! - Trace id flows through every entry and the forwarded request
//! - Logging is best-effort; sinks never fail a request
//! - State is owned by components created at server start and cleared at stop

pub mod buffer;
pub mod logging;
pub mod rotation;
pub mod sanitize;
pub mod stream;
pub mod trace;

pub use buffer::LogBuffer;
pub use logging::{LevelTable, LogEntry, LogLevel, Logger, SYSTEM_TRACE_ID};
pub use rotation::{RotatingFileWriter, RotationConfig};
pub use stream::{StreamFilter, StreamFormat, Subscription};
pub use trace::{extract_or_generate_id, RequestTrace, TraceManager};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the process console subscriber.
///
/// `RUST_LOG` wins over the configured level. Audit entries are already
/// level-filtered by the [`Logger`], so their target is always enabled.
pub fn init_console(level: LogLevel) {
    let default_filter = match level {
        LogLevel::None => "off".to_string(),
        other => format!("audit_proxy={other},audit_proxy::log=debug,tower_http=warn"),
    };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
