//! Main proxy handler.
//!
//! # Data Flow
//! ```text
//! Request
//!     → trace id (inbound header or fresh)
//!     → resolve route ── NotFound → 404 JSON / Disabled → 503 JSON
//!                         (bare status for upgrade requests)
//!     → WebSocket upgrade? → websocket.rs
//!     → start trace, capture request body (POST/PUT/PATCH, if enabled)
//!     → rewrite path, inject x-trace-id / x-forwarded-host
//!     → upstream pool ── error → 502 JSON
//!     → response.rs (relay, finish trace, log)
//! ```
//!
//! # Design Decisions
//! - Every failure is contained here: errors become JSON responses, panics a 500
//! - Refused/reset upstreams log at warn, other upstream failures at error
//! - Once the trace starts the handler holds an armed [`ExchangeGuard`]; a
//!   client that disconnects first still gets its trace finished and logged

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::body::Body;
use axum::extract::State;
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{Method, Request, Version};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;

use crate::capture::capture_request_body;
use crate::error::ProxyError;
use crate::http::request::{
    domain_of, forwarded_path, inject_headers, is_websocket_upgrade, rewrite_path, upstream_uri,
};
use crate::http::response::{status_only, Exchange, ExchangeGuard};
use crate::http::server::AppState;
use crate::http::websocket;
use crate::observability::sanitize::mask_error;
use crate::observability::LogLevel;
use crate::routing::RouteMatch;

pub async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let trace_id = state.traces.id_for(request.headers());
    let upgrade = is_websocket_upgrade(&request);
    let mut guard = ExchangeGuard::default();

    let outcome = AssertUnwindSafe(forward(state.clone(), trace_id.clone(), request, &mut guard))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(response)) => response,
        // An upgrading client expects a handshake reply, not a JSON document.
        Ok(Err(err)) if upgrade => status_only(err.status()),
        Ok(Err(err)) => err.into_response(),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            let trace_id = guard.trace_id().map(str::to_string).unwrap_or(trace_id);
            state.logger.log(
                LogLevel::Error,
                format!("Handler fault: {message}"),
                &trace_id,
                None,
                None,
            );
            guard.fail(500, message.clone());
            ProxyError::Internal { trace_id, message }.into_response()
        }
    }
}

async fn forward(
    state: AppState,
    trace_id: String,
    request: Request<Body>,
    guard: &mut ExchangeGuard,
) -> Result<Response, ProxyError> {
    let snapshot = state.snapshot();
    let domain = domain_of(&request).unwrap_or_default();
    let path = request.uri().path().to_string();

    tracing::debug!(
        trace_id = %trace_id,
        method = %request.method(),
        domain = %domain,
        path = %path,
        "Proxying request"
    );

    let route = match snapshot.routes.resolve(&domain, &path) {
        RouteMatch::Found(route) => route,
        RouteMatch::NotFound => {
            state.logger.log(
                LogLevel::Warn,
                format!("No route for {domain}{path}"),
                &trace_id,
                Some(&domain),
                None,
            );
            return Err(ProxyError::RouteNotFound {
                trace_id,
                domain,
                available: snapshot.routes.keys(),
            });
        }
        RouteMatch::Disabled(route) => {
            state.logger.log(
                LogLevel::Info,
                format!("Route {} is disabled", route.key),
                &trace_id,
                Some(&domain),
                None,
            );
            return Err(ProxyError::RouteDisabled {
                trace_id,
                domain,
                route: route.key,
            });
        }
    };

    if is_websocket_upgrade(&request) {
        return Ok(websocket::relay(state, route, trace_id, domain, request, guard).await);
    }

    let global = &snapshot.config.global;
    let target = route.config.target.clone();
    let trace_id = state
        .traces
        .start(&trace_id, &request, Some(domain.clone()), Some(target.clone()))
        .id;
    let exchange = Exchange {
        logger: state.logger.clone(),
        traces: state.traces.clone(),
        trace_id: trace_id.clone(),
        flags: route.config.capture_flags(global),
    };
    guard.arm(exchange.clone());

    let (mut parts, body) = request.into_parts();

    let body = if exchange.flags.request_body
        && matches!(parts.method, Method::POST | Method::PUT | Method::PATCH)
    {
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let capture = capture_request_body(body, content_type, global.body_capture_limit).await;
        state.traces.attach_request_body(&trace_id, capture.logged);
        capture.body
    } else {
        body
    };

    let rewritten = rewrite_path(
        &path,
        route.path_prefix.as_deref(),
        route.config.path_replace.as_deref(),
    );
    let uri = match upstream_uri(&target, &rewritten, parts.uri.query()) {
        Ok(uri) => uri,
        Err(e) => {
            let message = e.to_string();
            state.logger.log(
                LogLevel::Error,
                format!("Cannot build upstream request: {message}"),
                &trace_id,
                Some(&domain),
                None,
            );
            guard.fail(502, message.clone());
            return Err(ProxyError::BadGateway {
                trace_id,
                target,
                message,
            });
        }
    };

    tracing::debug!(
        trace_id = %trace_id,
        upstream = %uri,
        forwarded = %forwarded_path(&uri),
        "Forwarding request"
    );

    let host = parts.headers.get(HOST).cloned();
    inject_headers(&mut parts.headers, &trace_id, host);
    parts.uri = uri;
    parts.version = Version::HTTP_11;

    match state.upstream.send(Request::from_parts(parts, body)).await {
        Ok(response) => {
            guard.release();
            Ok(exchange.relay(response, global.body_capture_limit))
        }
        Err(e) => {
            let message = mask_error(&e.to_string());
            let level = if e.is_transient() {
                LogLevel::Warn
            } else {
                LogLevel::Error
            };
            state.logger.log(
                level,
                format!("Upstream {target} failed: {message}"),
                &trace_id,
                Some(&domain),
                None,
            );
            guard.fail(502, message.clone());
            Err(ProxyError::BadGateway {
                trace_id,
                target,
                message,
            })
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
