//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build state → Bind listeners → Spawn tasks
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain connections → Clear traces and logs
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then state, then listeners
//! - Ordered shutdown: stop accept, drain, clear process-scoped state

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{launch, LaunchOptions, Running, StartupError};
