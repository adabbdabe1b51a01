//! Request handling and transformation.
//!
//! # Responsibilities
//! - Extract routing-relevant information (domain, path)
//! - Rewrite the forwarded path per route prefix/replacement
//! - Build the absolute upstream URI from the route target
//! - Inject correlation headers onto the forwarded request
//!
//! # Design Decisions
//! - `Host` and all other inbound headers are forwarded unchanged
//! - An explicit empty replacement strips the prefix; absent leaves the path alone
//! - Original request preserved for logging; modified copy forwarded

use axum::http::header::{CONNECTION, HOST, UPGRADE};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, HeaderValue, Request, Uri};
use url::Url;

pub const X_TRACE_ID: &str = "x-trace-id";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Lowercase domain from a `Host` value, without port.
pub fn extract_domain(host: &str) -> String {
    let host = host.trim();
    let domain = if let Some(rest) = host.strip_prefix('[') {
        // [::1]:8080
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(name, _)| name)
            .unwrap_or(host)
    };
    domain.to_ascii_lowercase()
}

/// Domain of a request: `Host` header, else the URI authority.
pub fn domain_of<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())
        .map(extract_domain)
        .filter(|d| !d.is_empty())
}

/// Rewrite `path` by replacing `prefix` with `replacement`.
///
/// No-op unless both are present and the path starts with the prefix.
/// A rewrite that leaves an empty path yields `/`.
pub fn rewrite_path(path: &str, prefix: Option<&str>, replacement: Option<&str>) -> String {
    let (Some(prefix), Some(replacement)) = (prefix, replacement) else {
        return path.to_string();
    };
    let Some(rest) = path.strip_prefix(prefix) else {
        return path.to_string();
    };

    let mut rewritten = String::with_capacity(replacement.len() + rest.len() + 1);
    rewritten.push_str(replacement);
    rewritten.push_str(rest);
    if rewritten.is_empty() {
        return "/".to_string();
    }
    if !rewritten.starts_with('/') {
        rewritten.insert(0, '/');
    }
    rewritten
}

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("invalid target `{0}`")]
    Invalid(String),
    #[error("invalid upstream uri: {0}")]
    Uri(#[from] axum::http::uri::InvalidUri),
}

/// Absolute upstream URI: target origin + target base path + rewritten path + query.
///
/// `ws`/`wss` targets map to `http`/`https` since the handshake is plain HTTP.
pub fn upstream_uri(target: &str, path: &str, query: Option<&str>) -> Result<Uri, TargetError> {
    let base = Url::parse(target).map_err(|_| TargetError::Invalid(target.to_string()))?;
    let scheme = match base.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        _ => return Err(TargetError::Invalid(target.to_string())),
    };
    let host = base
        .host_str()
        .ok_or_else(|| TargetError::Invalid(target.to_string()))?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let base_path = base.path().trim_end_matches('/');
    let mut uri = format!("{scheme}://{authority}{base_path}{path}");
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    Ok(uri.parse()?)
}

/// Path and query of the forwarded request, for logs.
pub fn forwarded_path(uri: &Uri) -> &str {
    uri.path_and_query().map(PathAndQuery::as_str).unwrap_or("/")
}

/// Add `x-trace-id` and `x-forwarded-host`.
pub fn inject_headers(headers: &mut HeaderMap, trace_id: &str, host: Option<HeaderValue>) {
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        headers.insert(X_TRACE_ID, value);
    }
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }
}

/// `Connection: upgrade` + `Upgrade: websocket`.
pub fn is_websocket_upgrade<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
    let websocket = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    connection_upgrade && websocket
}
