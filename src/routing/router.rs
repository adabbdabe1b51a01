//! Route table and resolution.
//!
//! # Responsibilities
//! - Compile route keys from a configuration snapshot
//! - Score every route against a request domain + path
//! - Return the best match, an explicit "disabled", or no match
//!
//! # Design Decisions
//! - Immutable after construction; reloads build a new table
//! - O(n) scan; route counts for a local gateway are small
//! - Ties keep the first route in table order. The table is built from a hash
//!   map, so that order is not stable across rebuilds.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RouteConfig;
use crate::routing::matcher::{DomainMatcher, PathPrefixMatcher, RouteKey};

#[derive(Debug)]
struct CompiledRoute {
    key: String,
    domain: DomainMatcher,
    path: Option<PathPrefixMatcher>,
    config: Arc<RouteConfig>,
}

/// A route selected for a request.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Original route key.
    pub key: String,
    /// Path prefix that matched (from the key or the route's `pathPrefix`).
    pub path_prefix: Option<String>,
    pub config: Arc<RouteConfig>,
    pub score: usize,
}

/// Outcome of resolving a request.
#[derive(Debug, Clone)]
pub enum RouteMatch {
    Found(ResolvedRoute),
    /// Best match exists but is switched off.
    Disabled(ResolvedRoute),
    NotFound,
}

/// Compiled, immutable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compile routes. Keys that fail to parse are skipped with a warning.
    pub fn from_config(routes: &HashMap<String, RouteConfig>) -> Self {
        let mut compiled = Vec::with_capacity(routes.len());
        for (key, config) in routes {
            match RouteKey::parse(key) {
                Ok(parsed) => {
                    let prefix = parsed.path_prefix.or_else(|| config.path_prefix.clone());
                    compiled.push(CompiledRoute {
                        key: key.clone(),
                        domain: parsed.domain,
                        path: prefix.map(PathPrefixMatcher::new),
                        config: Arc::new(config.clone()),
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Skipping invalid route"),
            }
        }
        Self { routes: compiled }
    }

    /// Find the best route for `domain` (lowercase, no port) and `path`.
    pub fn resolve(&self, domain: &str, path: &str) -> RouteMatch {
        let mut best: Option<(&CompiledRoute, usize)> = None;

        for route in &self.routes {
            let Some(mut score) = route.domain.score(domain) else {
                continue;
            };
            if let Some(path_matcher) = &route.path {
                match path_matcher.score(path) {
                    Some(extra) => score += extra,
                    None => continue,
                }
            }
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((route, score));
            }
        }

        match best {
            None => RouteMatch::NotFound,
            Some((route, score)) => {
                let resolved = ResolvedRoute {
                    key: route.key.clone(),
                    path_prefix: route.path.as_ref().map(|p| p.prefix().to_string()),
                    config: route.config.clone(),
                    score,
                };
                if route.config.enabled {
                    RouteMatch::Found(resolved)
                } else {
                    RouteMatch::Disabled(resolved)
                }
            }
        }
    }

    /// Configured route keys, sorted for stable output.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.routes.iter().map(|r| r.key.clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolve against a table. Pure; never mutates route state.
pub fn resolve(domain: &str, path: &str, table: &RouteTable) -> RouteMatch {
    table.resolve(domain, path)
}
