//! Route key parsing and match scoring.
//!
//! # Responsibilities
//! - Parse `domain` / `domain:/path` keys into a structured [`RouteKey`]
//! - Score a domain against exact and leading-wildcard patterns
//! - Score a path against a prefix
//!
//! # Design Decisions
//! - Domain matching is case-insensitive
//! - Path matching is case-sensitive
//! - Exact domain: 1000, wildcard domain: 500, plus path prefix length
//! - No regex to guarantee O(n) matching

use thiserror::Error;

/// Base score of an exact domain match.
pub const EXACT_DOMAIN_SCORE: usize = 1000;

/// Base score of a wildcard (`*.suffix`) domain match.
pub const WILDCARD_DOMAIN_SCORE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteKeyError {
    #[error("route key `{0}` has an empty domain")]
    EmptyDomain(String),
    #[error("route key `{0}`: wildcard must be a leading `*.` followed by a suffix")]
    InvalidWildcard(String),
    #[error("route key `{0}`: path prefix must start with '/'")]
    InvalidPath(String),
}

/// Matches the request domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainMatcher {
    /// `api.local`
    Exact(String),
    /// `*.dev.local`, stored as the `.dev.local` suffix.
    Wildcard(String),
}

impl DomainMatcher {
    /// Parse a domain pattern. The pattern is normalized to lowercase.
    pub fn parse(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().to_ascii_lowercase();
        if pattern.is_empty() {
            return None;
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            if suffix.len() < 2 || !suffix.starts_with('.') || suffix.contains('*') {
                return None;
            }
            return Some(Self::Wildcard(suffix.to_string()));
        }
        if pattern.contains('*') {
            return None;
        }
        Some(Self::Exact(pattern))
    }

    /// Base score for `domain` (expected lowercase), or None when it does not match.
    pub fn score(&self, domain: &str) -> Option<usize> {
        match self {
            Self::Exact(expected) => (expected == domain).then_some(EXACT_DOMAIN_SCORE),
            Self::Wildcard(suffix) => domain.ends_with(suffix.as_str()).then_some(WILDCARD_DOMAIN_SCORE),
        }
    }
}

impl std::fmt::Display for DomainMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(d) => f.write_str(d),
            Self::Wildcard(suffix) => write!(f, "*{suffix}"),
        }
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Score contribution (prefix length), or None when the path does not start with it.
    pub fn score(&self, path: &str) -> Option<usize> {
        path.starts_with(&self.prefix).then_some(self.prefix.len())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Structured form of a route key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteKey {
    pub domain: DomainMatcher,
    pub path_prefix: Option<String>,
}

impl RouteKey {
    /// Parse `domain` or `domain:/prefix`.
    pub fn parse(key: &str) -> Result<Self, RouteKeyError> {
        let (domain_part, path_part) = match key.split_once(':') {
            Some((d, p)) => (d, Some(p)),
            None => (key, None),
        };

        if domain_part.trim().is_empty() {
            return Err(RouteKeyError::EmptyDomain(key.to_string()));
        }
        let domain = DomainMatcher::parse(domain_part)
            .ok_or_else(|| RouteKeyError::InvalidWildcard(key.to_string()))?;

        let path_prefix = match path_part {
            Some(p) if !p.starts_with('/') => return Err(RouteKeyError::InvalidPath(key.to_string())),
            Some(p) => Some(p.to_string()),
            None => None,
        };

        Ok(Self {
            domain,
            path_prefix,
        })
    }
}
