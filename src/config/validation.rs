//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check route keys parse and targets are absolute http(s)/ws(s) URLs
//! - Validate value ranges (rotation size, pool size, timeouts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::routing::{DomainMatcher, RouteKey, RouteKeyError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(transparent)]
    RouteKey(#[from] RouteKeyError),

    #[error("route `{route}`: invalid target `{target}`: {reason}")]
    InvalidTarget {
        route: String,
        target: String,
        reason: String,
    },

    #[error("route `{route}`: pathPrefix `{prefix}` must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("logging.domains: invalid domain pattern `{0}`")]
    InvalidDomainPattern(String),

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (key, route) in &config.routes {
        if let Err(e) = RouteKey::parse(key) {
            errors.push(e.into());
        }

        if let Err(reason) = check_target(&route.target) {
            errors.push(ValidationError::InvalidTarget {
                route: key.clone(),
                target: route.target.clone(),
                reason,
            });
        }

        if let Some(prefix) = &route.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPathPrefix {
                    route: key.clone(),
                    prefix: prefix.clone(),
                });
            }
        }
    }

    for pattern in config.global.logging.domains.keys() {
        if DomainMatcher::parse(pattern).is_none() {
            errors.push(ValidationError::InvalidDomainPattern(pattern.clone()));
        }
    }

    let global = &config.global;
    if global.log_rotation.max_file_size == 0 {
        errors.push(ValidationError::Zero {
            field: "global.logRotation.maxFileSize",
        });
    }
    if global.pool.max_sockets == 0 {
        errors.push(ValidationError::Zero {
            field: "global.pool.maxSockets",
        });
    }
    if global.upstream_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "global.upstreamTimeoutMs",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_target(target: &str) -> Result<(), String> {
    let url = Url::parse(target).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => return Err(format!("unsupported scheme `{other}`")),
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
