//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Forward the upgrade handshake to the routed target
//! - Bridge both upgraded connections byte-for-byte
//! - Log connection open and close
//!
//! # Data Flow
//! ```text
//! Client ──upgrade──→ Proxy ──dedicated conn + upgrade──→ Backend
//!        ←── 101 ────        ←──────── 101 ──────────────
//! Client ←──── raw bytes ────→ Proxy ←──── raw bytes ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Upgrades bypass the pools; each socket owns its upstream connection
//! - Frames are not parsed; close and ping/pong pass through untouched
//! - Routing failures answer with a bare status and no body
//! - A non-101 reply from the target is relayed to the client as-is

use axum::body::Body;
use axum::http::header::HOST;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, Request, Response, StatusCode, Uri, Version};
use hyper_util::rt::TokioIo;
use serde_json::json;

use crate::http::request::{inject_headers, rewrite_path, upstream_uri, X_TRACE_ID};
use crate::http::response::{status_only, Exchange, ExchangeGuard};
use crate::http::server::AppState;
use crate::http::upstream::UpstreamError;
use crate::observability::sanitize::mask_error;
use crate::observability::LogLevel;
use crate::routing::ResolvedRoute;

/// Relay one upgrade request to `route`.
pub async fn relay(
    state: AppState,
    route: ResolvedRoute,
    trace_id: String,
    domain: String,
    mut req: Request<Body>,
    guard: &mut ExchangeGuard,
) -> Response<Body> {
    let target = route.config.target.clone();
    let snapshot = state.snapshot();
    let trace_id = state
        .traces
        .start(&trace_id, &req, Some(domain.clone()), Some(target.clone()))
        .id;
    let exchange = Exchange {
        logger: state.logger.clone(),
        traces: state.traces.clone(),
        trace_id: trace_id.clone(),
        flags: route.config.capture_flags(&snapshot.config.global),
    };
    guard.arm(exchange.clone());

    let client_upgrade = hyper::upgrade::on(&mut req);

    let upstream_response = match handshake(&route, &trace_id, &state, req).await {
        Ok(response) => response,
        Err(e) => {
            let message = mask_error(&e.to_string());
            let level = if e.is_transient() {
                LogLevel::Warn
            } else {
                LogLevel::Error
            };
            state.logger.log(
                level,
                format!("WebSocket upstream {target} failed: {message}"),
                &trace_id,
                Some(&domain),
                None,
            );
            guard.fail(StatusCode::BAD_GATEWAY.as_u16(), message);
            return status_only(StatusCode::BAD_GATEWAY);
        }
    };

    if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        // Target declined the upgrade; pass its answer through.
        guard.release();
        let (parts, body) = upstream_response.into_parts();
        return exchange.relay(Response::from_parts(parts, Body::new(body)), 0);
    }

    let mut upstream_response = upstream_response;
    let upstream_upgrade = hyper::upgrade::on(&mut upstream_response);
    let (mut parts, _) = upstream_response.into_parts();
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        parts.headers.insert(X_TRACE_ID, value);
    }
    guard.release();
    exchange.finish(StatusCode::SWITCHING_PROTOCOLS.as_u16(), None, None, None);

    state.logger.log(
        LogLevel::Info,
        format!("WebSocket opened: {domain} -> {target}"),
        &trace_id,
        Some(&domain),
        None,
    );

    let logger = state.logger.clone();
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client_upgrade, upstream_upgrade) {
            Ok(pair) => pair,
            Err(e) => {
                logger.log(
                    LogLevel::Warn,
                    format!("WebSocket upgrade failed: {e}"),
                    &trace_id,
                    Some(&domain),
                    None,
                );
                return;
            }
        };

        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        let (level, message, data) =
            match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                Ok((to_upstream, to_client)) => (
                    LogLevel::Info,
                    format!("WebSocket closed: {domain} -> {target}"),
                    Some(json!({"bytesToUpstream": to_upstream, "bytesToClient": to_client})),
                ),
                Err(e) => (
                    LogLevel::Info,
                    format!("WebSocket closed: {domain} -> {target} ({e})"),
                    None,
                ),
            };
        logger.log(level, message, &trace_id, Some(&domain), data);
    });

    Response::from_parts(parts, Body::empty())
}

async fn handshake(
    route: &ResolvedRoute,
    trace_id: &str,
    state: &AppState,
    req: Request<Body>,
) -> Result<Response<hyper::body::Incoming>, UpstreamError> {
    let (mut parts, body) = req.into_parts();

    let path = rewrite_path(
        parts.uri.path(),
        route.path_prefix.as_deref(),
        route.config.path_replace.as_deref(),
    );
    let uri = upstream_uri(&route.config.target, &path, parts.uri.query())?;

    let host = parts.headers.get(HOST).cloned();
    inject_headers(&mut parts.headers, trace_id, host);

    let stream = state.upstream.connect_dedicated(uri.clone()).await?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake::<_, Body>(stream).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.with_upgrades().await {
            tracing::debug!(error = %e, "Upstream WebSocket connection ended");
        }
    });

    // Origin-form on the wire; the connection already targets the host.
    parts.uri = Uri::from(
        uri.path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/")),
    );
    parts.version = Version::HTTP_11;

    let send = sender.send_request(Request::from_parts(parts, body));
    let timeout = state.upstream.timeout();
    let response = tokio::time::timeout(timeout, send)
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))??;
    Ok(response)
}
