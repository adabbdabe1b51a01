//! Body capture subsystem.
//!
//! # Data Flow
//! ```text
//! Request body (POST/PUT/PATCH, capture enabled)
//!     → body.rs: buffer ≤ limit, 100ms idle cutoff
//!     → forwarded body = captured chunks ++ untouched remainder
//!
//! Response body (capture enabled)
//!     → tee.rs: CaptureBody forwards frames unchanged
//!     → bounded snapshot handed to the completion callback at end of stream
//! ```
//!
//! # Design Decisions
//! - Capture caps memory, never throughput: data past the limit is only counted
//! - Capture failures become placeholders; they never abort the exchange
//! - Buffers are request-scoped and never shared

pub mod body;
pub mod tee;

pub use body::{capture_request_body, BodySnapshot, RequestCapture, DEFAULT_CAPTURE_LIMIT, EMPTY_BODY};
pub use tee::{CaptureBody, CaptureOutcome};
