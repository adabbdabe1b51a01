//! Response handling and exchange completion.
//!
//! # Responsibilities
//! - Relay upstream responses unchanged (status, headers, streamed body)
//! - Optionally tee the response body into a bounded capture
//! - Finalize the trace and emit the request log exactly when the exchange ends
//!
//! # Design Decisions
//! - The exchange completes when the body ends, fails or is dropped, so
//!   duration covers the full transfer and a client that leaves mid-body is
//!   recorded with an error
//! - An empty upstream body completes the exchange at response head
//! - [`ExchangeGuard`] finishes a started exchange if the handler future is
//!   dropped before any of the above takes over
//! - Finishing twice is harmless; the trace manager ignores the second call

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Response, StatusCode};
use http_body::Body as _;
use serde_json::Value;

use crate::capture::{BodySnapshot, CaptureBody};
use crate::config::CaptureFlags;
use crate::http::request::X_TRACE_ID;
use crate::observability::sanitize::sanitize_headers;
use crate::observability::{Logger, TraceManager};

/// Everything needed to close out one proxied exchange.
#[derive(Clone)]
pub struct Exchange {
    pub logger: Arc<Logger>,
    pub traces: Arc<TraceManager>,
    pub trace_id: String,
    pub flags: CaptureFlags,
}

impl Exchange {
    /// Finalize the trace and log it. No-op when already finished.
    pub fn finish(
        &self,
        status: u16,
        error: Option<String>,
        response_headers: Option<std::collections::BTreeMap<String, String>>,
        response_body: Option<Value>,
    ) {
        if let Some(trace) =
            self.traces
                .finish(&self.trace_id, status, error, response_headers, response_body)
        {
            self.logger.log_request(&trace, self.flags);
        }
    }

    /// Hand the upstream response to the client. The exchange completes
    /// when the body has been streamed, or right away for an empty body.
    pub fn relay(self, response: Response<Body>, capture_limit: usize) -> Response<Body> {
        let status = response.status().as_u16();
        let response_headers = self
            .flags
            .response_headers
            .then(|| sanitize_headers(response.headers()));
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (parts, body) = response.into_parts();
        let mut response = if body.is_end_stream() {
            let captured = self
                .flags
                .response_body
                .then(|| BodySnapshot::new(capture_limit).to_value(content_type.as_deref()));
            self.finish(status, None, response_headers, captured);
            Response::from_parts(parts, body)
        } else {
            self.traces.record_status(&self.trace_id, status);
            let limit = if self.flags.response_body { capture_limit } else { 0 };
            let exchange = self.clone();
            let body = CaptureBody::new(body, limit, move |outcome| {
                let captured = exchange
                    .flags
                    .response_body
                    .then(|| outcome.snapshot.to_value(content_type.as_deref()));
                exchange.finish(status, outcome.error, response_headers, captured);
            });
            Response::from_parts(parts, Body::new(body))
        };

        if let Ok(value) = HeaderValue::from_str(&self.trace_id) {
            response.headers_mut().insert(X_TRACE_ID, value);
        }
        response
    }
}

/// Status recorded when the client leaves before the response head.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Finishes a started exchange as failed when dropped while still armed.
///
/// The handler owns the guard, so it fires when hyper drops the handler
/// future after a client disconnect. Whatever completes the exchange takes it
/// back out with [`ExchangeGuard::release`] or [`ExchangeGuard::fail`].
#[derive(Default)]
pub struct ExchangeGuard {
    exchange: Option<Exchange>,
}

impl ExchangeGuard {
    pub fn arm(&mut self, exchange: Exchange) {
        self.exchange = Some(exchange);
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.exchange.as_ref().map(|e| e.trace_id.as_str())
    }

    pub fn release(&mut self) -> Option<Exchange> {
        self.exchange.take()
    }

    /// Finish the armed exchange with `error` and disarm.
    pub fn fail(&mut self, status: u16, error: String) {
        if let Some(exchange) = self.exchange.take() {
            exchange.finish(status, Some(error), None, None);
        }
    }
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.fail(
            CLIENT_CLOSED_REQUEST,
            "client disconnected before response".to_string(),
        );
    }
}

/// Bare status response (no body), used where no structured reply is possible.
pub fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
