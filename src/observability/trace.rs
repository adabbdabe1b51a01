//! Request correlation.
//!
//! # Responsibilities
//! - Pick up an inbound correlation id or generate a new one
//! - Track one [`RequestTrace`] per in-flight request
//! - Finalize traces with status, duration and captured details
//! - Keep finished traces queryable for a retention window
//!
//! # Design Decisions
//! - Concurrent map (dashmap) so request tasks never serialize on one lock
//! - An id already in the table is never overwritten; the new trace gets a
//!   suffixed id and keeps the requested one as `correlationId`
//! - Finishing twice is tolerated: the second call returns `None`
//! - Expired traces are removed by a background reaper, and filtered on read
//! - Unfinished traces still without a response status after the upstream
//!   timeout plus retention are reaped as well; a streaming body owns its
//!   trace until it ends or is dropped

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Request};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::observability::sanitize::sanitize_headers;

/// Correlation headers checked in order; the first present one wins.
pub const CORRELATION_HEADERS: &[&str] = &[
    "x-trace-id",
    "x-request-id",
    "x-correlation-id",
    "traceparent",
    "x-amzn-trace-id",
];

/// Default retention of finished traces.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60);

/// Default age after which an unfinished trace is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(90);

/// How often the reaper sweeps finished traces.
const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Reuse an inbound correlation id, or generate a UUID v4.
pub fn extract_or_generate_id(headers: &HeaderMap) -> String {
    extract_id(headers).unwrap_or_else(generate_id)
}

/// Inbound correlation id, if any.
pub fn extract_id(headers: &HeaderMap) -> Option<String> {
    for name in CORRELATION_HEADERS {
        let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if *name == "traceparent" {
            // version-traceid-parentid-flags
            match value.split('-').nth(1).filter(|s| !s.is_empty()) {
                Some(trace_id) => return Some(trace_id.to_string()),
                None => continue,
            }
        }
        return Some(value.to_string());
    }
    None
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn suffixed_id(id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{id}-{}", &suffix[..8])
}

/// Correlation record for one proxied request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrace {
    pub id: String,
    /// Requested id, when it was already taken and the trace was re-keyed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip)]
    pub started: Instant,
    pub method: String,
    pub url: String,
    pub request_headers: BTreeMap<String, String>,
    pub domain: Option<String>,
    pub target: Option<String>,
    pub duration_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub request_body: Option<Value>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub response_body: Option<Value>,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
}

impl RequestTrace {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

/// Owner of all in-flight and recently finished traces.
pub struct TraceManager {
    traces: DashMap<String, RequestTrace>,
    retention: Duration,
    stale_after_ms: AtomicU64,
    trust_incoming: AtomicBool,
    started_total: AtomicU64,
}

impl TraceManager {
    pub fn new(retention: Duration, trust_incoming: bool) -> Self {
        Self {
            traces: DashMap::new(),
            retention,
            stale_after_ms: AtomicU64::new(DEFAULT_STALE_AFTER.as_millis() as u64),
            trust_incoming: AtomicBool::new(trust_incoming),
            started_total: AtomicU64::new(0),
        }
    }

    pub fn set_trust_incoming(&self, trust: bool) {
        self.trust_incoming.store(trust, Ordering::Relaxed);
    }

    /// Age after which an unfinished trace is dropped by the reaper.
    pub fn set_stale_after(&self, after: Duration) {
        self.stale_after_ms
            .store(after.as_millis() as u64, Ordering::Relaxed);
    }

    /// Trace id for a request: inbound id when trusted, otherwise fresh.
    pub fn id_for(&self, headers: &HeaderMap) -> String {
        if self.trust_incoming.load(Ordering::Relaxed) {
            extract_or_generate_id(headers)
        } else {
            generate_id()
        }
    }

    /// Record the start of a request under `id`.
    ///
    /// When `id` is already held (a client reusing a correlation header) the
    /// trace is stored under `<id>-<8 hex>` instead. Callers must use the
    /// returned trace's id from here on.
    pub fn start<B>(&self, id: &str, req: &Request<B>, domain: Option<String>, target: Option<String>) -> RequestTrace {
        let mut trace = RequestTrace {
            id: id.to_string(),
            correlation_id: None,
            start_time: Utc::now(),
            started: Instant::now(),
            method: req.method().to_string(),
            url: req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            request_headers: sanitize_headers(req.headers()),
            domain,
            target,
            duration_ms: None,
            status_code: None,
            error: None,
            request_body: None,
            response_headers: None,
            response_body: None,
            finished_at: None,
        };

        let mut key = id.to_string();
        loop {
            match self.traces.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    if key != id {
                        trace.correlation_id = Some(id.to_string());
                    }
                    trace.id = key;
                    slot.insert(trace.clone());
                    break;
                }
                Entry::Occupied(_) => key = suffixed_id(id),
            }
        }
        self.started_total.fetch_add(1, Ordering::Relaxed);
        trace
    }

    /// Note the upstream status once the response head arrives.
    pub fn record_status(&self, id: &str, status_code: u16) {
        if let Some(mut trace) = self.traces.get_mut(id) {
            if !trace.is_finished() {
                trace.status_code = Some(status_code);
            }
        }
    }

    pub fn attach_request_body(&self, id: &str, body: Value) {
        if let Some(mut trace) = self.traces.get_mut(id) {
            trace.request_body = Some(body);
        }
    }

    /// Finalize a trace. `None` when the id is unknown or already finished.
    pub fn finish(
        &self,
        id: &str,
        status_code: u16,
        error: Option<String>,
        response_headers: Option<BTreeMap<String, String>>,
        response_body: Option<Value>,
    ) -> Option<RequestTrace> {
        let mut trace = self.traces.get_mut(id)?;
        if trace.is_finished() {
            return None;
        }
        let now = Instant::now();
        trace.status_code = Some(status_code);
        trace.duration_ms = Some(now.duration_since(trace.started).as_millis() as u64);
        trace.error = error;
        trace.response_headers = response_headers;
        trace.response_body = response_body;
        trace.finished_at = Some(now);
        Some(trace.clone())
    }

    /// A trace by id, unless its retention window has passed.
    pub fn get(&self, id: &str) -> Option<RequestTrace> {
        let trace = self.traces.get(id)?;
        if self.is_expired(&trace, Instant::now()) {
            return None;
        }
        Some(trace.clone())
    }

    fn is_expired(&self, trace: &RequestTrace, now: Instant) -> bool {
        match trace.finished_at {
            Some(finished) => now.duration_since(finished) >= self.retention,
            None if trace.status_code.is_some() => false,
            None => {
                let stale_after = Duration::from_millis(self.stale_after_ms.load(Ordering::Relaxed));
                now.duration_since(trace.started) >= stale_after
            }
        }
    }

    /// Remove finished traces older than the retention window, and abandoned
    /// unfinished ones.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.traces.len();
        self.traces.retain(|_, trace| !self.is_expired(trace, now));
        before.saturating_sub(self.traces.len())
    }

    /// Periodically evict expired traces until shutdown.
    pub fn spawn_reaper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let period = REAP_INTERVAL.min(self.retention.max(Duration::from_millis(100)));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = self.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = self.traces.len(), "Evicted expired traces");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Trace reaper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Drop every trace (server stop).
    pub fn clear(&self) {
        self.traces.clear();
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Traces started since construction.
    pub fn started_total(&self) -> u64 {
        self.started_total.load(Ordering::Relaxed)
    }
}

impl Default for TraceManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION, true)
    }
}
