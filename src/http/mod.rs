//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, state, config events)
//!     → proxy.rs (trace id, routing, failure containment)
//!     → request.rs (domain, path rewrite, upstream URI, injected headers)
//!     → upstream.rs (plain / TLS pools, dedicated upgrade connections)
//!     → response.rs (relay, optional body tee, trace + log completion)
//!     → Send to client
//!
//! Upgrade requests branch after routing into websocket.rs.
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod server;
pub mod upstream;
pub mod websocket;

pub use request::{X_FORWARDED_HOST, X_TRACE_ID};
pub use server::{AppState, HttpServer, Snapshot};
pub use upstream::{UpstreamError, UpstreamPools};
