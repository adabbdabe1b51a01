//! Bounded payload buffering and classification.

use std::time::Duration;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;

/// Placeholder logged for bodies with no content (or none within the idle window).
pub const EMPTY_BODY: &str = "[empty body]";

/// Default number of payload bytes kept for logging.
pub const DEFAULT_CAPTURE_LIMIT: usize = 10 * 1024;

/// How long request capture waits for the next chunk before giving up.
pub const REQUEST_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// A size-bounded copy of a payload.
#[derive(Debug, Clone, Default)]
pub struct BodySnapshot {
    bytes: BytesMut,
    limit: usize,
    total: usize,
    complete: bool,
}

impl BodySnapshot {
    pub fn new(limit: usize) -> Self {
        Self {
            bytes: BytesMut::new(),
            limit,
            total: 0,
            complete: false,
        }
    }

    /// Record a chunk; only the first `limit` bytes are kept.
    pub fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = self.limit.saturating_sub(self.bytes.len());
        if room > 0 {
            self.bytes
                .extend_from_slice(&chunk[..chunk.len().min(room)]);
        }
    }

    /// Mark that the whole payload has been observed.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    pub fn total_len(&self) -> usize {
        self.total
    }

    pub fn is_truncated(&self) -> bool {
        self.total > self.bytes.len() || !self.complete
    }

    /// Render the snapshot for a log entry.
    ///
    /// JSON content that was captured whole becomes structured data; text becomes
    /// a string (with a truncation marker); anything else is summarised.
    pub fn to_value(&self, content_type: Option<&str>) -> Value {
        if self.total == 0 {
            return Value::String(EMPTY_BODY.to_string());
        }

        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();

        if !self.is_truncated() && is_json(&mime) {
            if let Ok(value) = serde_json::from_slice::<Value>(&self.bytes) {
                return value;
            }
        }

        let textual = is_text(&mime) || (mime.is_empty() && std::str::from_utf8(&self.bytes).is_ok());
        if !textual {
            return Value::String(format!("[binary {} bytes]", self.total));
        }

        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.is_truncated() {
            if self.complete {
                text.push_str(&format!("... [truncated, {} bytes total]", self.total));
            } else {
                text.push_str("... [truncated]");
            }
        }
        Value::String(text)
    }
}

fn is_json(mime: &str) -> bool {
    mime == "application/json" || mime.ends_with("+json")
}

fn is_text(mime: &str) -> bool {
    mime.starts_with("text/")
        || is_json(mime)
        || mime.ends_with("+xml")
        || matches!(
            mime,
            "application/xml" | "application/javascript" | "application/x-www-form-urlencoded"
        )
}

/// Result of capturing a request body before forwarding it.
pub struct RequestCapture {
    /// Body to forward upstream; replays captured chunks then the untouched remainder.
    pub body: Body,
    /// Loggable representation (or a placeholder).
    pub logged: Value,
}

/// Buffer up to `limit` bytes of a request body for logging.
///
/// Gives up after [`REQUEST_IDLE_TIMEOUT`] without data. A read error yields a
/// placeholder; the caller forwards whatever remains either way.
pub async fn capture_request_body(
    mut body: Body,
    content_type: Option<&str>,
    limit: usize,
) -> RequestCapture {
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut snapshot = BodySnapshot::new(limit);
    let mut failure: Option<String> = None;
    let mut ended = false;

    while snapshot.total_len() < limit.max(1) {
        match tokio::time::timeout(REQUEST_IDLE_TIMEOUT, body.frame()).await {
            Err(_) => break,
            Ok(None) => {
                ended = true;
                break;
            }
            Ok(Some(Ok(frame))) => {
                if let Ok(data) = frame.into_data() {
                    snapshot.push(&data);
                    chunks.push(data);
                }
            }
            Ok(Some(Err(e))) => {
                failure = Some(e.to_string());
                break;
            }
        }
    }

    if ended {
        snapshot.finish();
    }

    let logged = match failure {
        Some(ref e) => {
            tracing::warn!(error = %e, "Request body capture failed");
            Value::String(format!("[capture failed: {e}]"))
        }
        None if snapshot.total_len() == 0 => Value::String(EMPTY_BODY.to_string()),
        None => snapshot.to_value(content_type),
    };

    let body = if ended {
        let mut whole = BytesMut::with_capacity(snapshot.total_len());
        for chunk in &chunks {
            whole.extend_from_slice(chunk);
        }
        Body::from(whole.freeze())
    } else {
        let replay = futures_util::stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
        Body::from_stream(replay.chain(body.into_data_stream()))
    };

    RequestCapture { body, logged }
}
