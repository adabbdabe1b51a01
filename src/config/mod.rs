//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → ConfigEvent::Loaded
//!
//! On file change:
//!     watcher.rs detects change (content actually differs)
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ConfigEvent::Changed / ConfigEvent::Error
//!     → server swaps its snapshot on Changed, keeps it on Error
//! ```
//!
//! # Design Decisions
//! - A snapshot is immutable; every change is a full reload
//! - Every field has a default, so `{"routes": {...}}` is a complete file
//! - An invalid revision is reported and never replaces the live snapshot

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CaptureFlags, GlobalConfig, LogRotationConfig, LoggingConfig, PoolConfig, ProxyConfig,
    RouteConfig, TracingConfig,
};
pub use validation::ValidationError;
pub use watcher::{ConfigEvent, ConfigWatcher};
