//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → router.rs (score every route, keep the best)
//!     → matcher.rs (domain tier + path prefix length)
//!     → Return: Found / Disabled / NotFound
//!
//! Route Compilation (startup and every reload):
//!     routes map (key → RouteConfig)
//!     → parse keys into RouteKey {domain, path_prefix?}
//!     → Freeze as immutable RouteTable, swapped in atomically
//! ```
//!
//! # Design Decisions
//! - Tables are never mutated; in-flight requests keep their snapshot
//! - Resolution is a pure function of (domain, path, table)
//! - Equal scores keep table order, which is not stable across reloads

pub mod matcher;
pub mod router;

pub use matcher::{DomainMatcher, RouteKey, RouteKeyError};
pub use router::{resolve, ResolvedRoute, RouteMatch, RouteTable};
