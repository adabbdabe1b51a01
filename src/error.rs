//! Client-facing proxy errors.
//!
//! Every variant renders as a JSON body carrying at least `error` and
//! `traceId`, plus an `x-trace-id` response header.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::http::request::X_TRACE_ID;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No route configured for {domain}")]
    RouteNotFound {
        trace_id: String,
        domain: String,
        available: Vec<String>,
    },

    #[error("Route {route} is disabled")]
    RouteDisabled {
        trace_id: String,
        domain: String,
        route: String,
    },

    #[error("Upstream {target} unavailable: {message}")]
    BadGateway {
        trace_id: String,
        target: String,
        message: String,
    },

    #[error("Internal proxy error: {message}")]
    Internal { trace_id: String, message: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::RouteDisabled { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            ProxyError::RouteNotFound { trace_id, .. }
            | ProxyError::RouteDisabled { trace_id, .. }
            | ProxyError::BadGateway { trace_id, .. }
            | ProxyError::Internal { trace_id, .. } => trace_id,
        }
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ProxyError::RouteNotFound {
                trace_id,
                domain,
                available,
            } => json!({
                "error": "Route not found",
                "message": self.to_string(),
                "domain": domain,
                "availableRoutes": available,
                "traceId": trace_id,
            }),
            ProxyError::RouteDisabled {
                trace_id,
                domain,
                route,
            } => json!({
                "error": "Route disabled",
                "message": self.to_string(),
                "domain": domain,
                "route": route,
                "traceId": trace_id,
            }),
            ProxyError::BadGateway {
                trace_id, target, ..
            } => json!({
                "error": "Bad Gateway",
                "message": self.to_string(),
                "target": target,
                "traceId": trace_id,
            }),
            ProxyError::Internal { trace_id, .. } => json!({
                "error": "Internal Server Error",
                "message": self.to_string(),
                "traceId": trace_id,
            }),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if let Ok(value) = HeaderValue::from_str(self.trace_id()) {
            response.headers_mut().insert(X_TRACE_ID, value);
        }
        response
    }
}
