//! Live log subscribers.
//!
//! # Responsibilities
//! - Hold the set of connected stream clients, each with its own filter
//! - Deliver entries with a single non-blocking send per subscriber
//! - Render entries as pretty lines or flat JSON
//!
//! # Design Decisions
//! - Each subscriber owns a bounded queue; a full or closed queue removes it
//! - [`Subscription`] is an RAII handle; dropping it unsubscribes

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::observability::logging::{LogEntry, LogLevel};
use crate::routing::DomainMatcher;

/// Queue depth per subscriber before it is considered too slow.
pub const SUBSCRIBER_QUEUE: usize = 1024;

/// Per-subscriber filter.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    /// Only entries at or below this level.
    pub level: Option<LogLevel>,
    /// Only entries whose domain matches (exact or `*.suffix`).
    pub domain: Option<DomainMatcher>,
}

impl StreamFilter {
    /// Build from raw query values. Unknown levels and bad patterns are ignored.
    pub fn from_query(level: Option<&str>, domain: Option<&str>) -> Self {
        Self {
            level: level.and_then(|l| l.parse().ok()),
            domain: domain.and_then(DomainMatcher::parse),
        }
    }

    pub fn accepts(&self, entry: &LogEntry) -> bool {
        if let Some(level) = self.level {
            if !level.accepts(entry.level) {
                return false;
            }
        }
        match (&self.domain, &entry.domain) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(matcher), Some(domain)) => matcher.score(&domain.to_ascii_lowercase()).is_some(),
        }
    }
}

/// Wire format of streamed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Pretty,
    Json,
}

impl StreamFormat {
    pub fn render(self, entry: &LogEntry) -> String {
        match self {
            StreamFormat::Json => serde_json::to_string(entry).unwrap_or_default(),
            StreamFormat::Pretty => render_pretty(entry),
        }
    }
}

/// `2024-01-01T00:00:00.000Z INFO  [1a2b3c4d] api.local GET / -> ...`
pub fn render_pretty(entry: &LogEntry) -> String {
    let trace: String = entry.trace_id.chars().take(8).collect();
    let level = entry.level.as_str().to_ascii_uppercase();
    format!(
        "{} {:<5} [{}] {} {}",
        entry.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        level,
        trace,
        entry.domain.as_deref().unwrap_or("-"),
        entry.message
    )
}

struct Subscriber {
    filter: StreamFilter,
    tx: mpsc::Sender<Arc<LogEntry>>,
}

/// Connected stream clients.
#[derive(Default)]
pub struct SubscriberSet {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; the returned handle removes it on drop.
    pub fn subscribe(set: &Arc<Self>, filter: StreamFilter) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = set.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = set.subscribers.lock() {
            subscribers.insert(id, Subscriber { filter, tx });
        }
        tracing::debug!(subscriber = id, "Log stream subscriber added");

        Subscription {
            id,
            set: Arc::downgrade(set),
            rx,
            history: Vec::new(),
            delivered: HashSet::new(),
        }
    }

    /// One best-effort send per matching subscriber.
    pub fn broadcast(&self, entry: &Arc<LogEntry>) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|id, subscriber| {
            if !subscriber.filter.accepts(entry) {
                return true;
            }
            match subscriber.tx.try_send(entry.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = *id, "Log stream subscriber too slow, disconnecting");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if subscribers.remove(&id).is_some() {
                tracing::debug!(subscriber = id, "Log stream subscriber removed");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber; their receivers observe end of stream.
    pub fn clear(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.clear();
        }
    }
}

/// A connected stream client.
pub struct Subscription {
    id: u64,
    set: Weak<SubscriberSet>,
    rx: mpsc::Receiver<Arc<LogEntry>>,
    history: Vec<Arc<LogEntry>>,
    delivered: HashSet<u64>,
}

impl Subscription {
    pub(crate) fn with_history(mut self, history: Vec<Arc<LogEntry>>) -> Self {
        self.delivered = history.iter().map(|e| e.seq).collect();
        self.history = history;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Buffered entries captured at subscription time, oldest first.
    pub fn take_history(&mut self) -> Vec<Arc<LogEntry>> {
        std::mem::take(&mut self.history)
    }

    /// Next live entry. `None` once the subscriber was dropped from the set.
    pub async fn recv(&mut self) -> Option<Arc<LogEntry>> {
        loop {
            let entry = self.rx.recv().await?;
            if self.delivered.is_empty() || !self.delivered.remove(&entry.seq) {
                return Some(entry);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn entry(seq: u64, level: LogLevel, domain: Option<&str>) -> Arc<LogEntry> {
        Arc::new(LogEntry {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            level,
            trace_id: "0123456789abcdef".into(),
            domain: domain.map(str::to_string),
            message: format!("message {seq}"),
            data: None,
            seq,
        })
    }

    #[test]
    fn filter_by_level_and_domain() {
        let filter = StreamFilter::from_query(Some("warn"), Some("*.dev.local"));
        assert!(filter.accepts(&entry(1, LogLevel::Error, Some("x.dev.local"))));
        assert!(!filter.accepts(&entry(2, LogLevel::Info, Some("x.dev.local"))));
        assert!(!filter.accepts(&entry(3, LogLevel::Error, Some("api.local"))));
        assert!(!filter.accepts(&entry(4, LogLevel::Error, None)));

        let open = StreamFilter::from_query(None, None);
        assert!(open.accepts(&entry(5, LogLevel::Debug, None)));
    }

    #[test]
    fn pretty_line_layout() {
        let line = render_pretty(&entry(1, LogLevel::Info, Some("api.local")));
        assert_eq!(line, "2024-01-02T03:04:05.000Z INFO  [01234567] api.local message 1");

        let line = render_pretty(&entry(2, LogLevel::Error, None));
        assert!(line.contains("ERROR [01234567] - message 2"));
    }

    #[test]
    fn json_render_is_flat_entry() {
        let value: serde_json::Value =
            serde_json::from_str(&StreamFormat::Json.render(&entry(1, LogLevel::Warn, None))).unwrap();
        assert_eq!(value["level"], "warn");
        assert_eq!(value["traceId"], "0123456789abcdef");
        assert!(value["domain"].is_null());
    }

    #[tokio::test]
    async fn broadcast_respects_filters_and_drop_unsubscribes() {
        let set = Arc::new(SubscriberSet::new());
        let mut errors = SubscriberSet::subscribe(&set, StreamFilter::from_query(Some("error"), None));
        let mut all = SubscriberSet::subscribe(&set, StreamFilter::default());
        assert_eq!(set.len(), 2);

        set.broadcast(&entry(1, LogLevel::Info, None));
        set.broadcast(&entry(2, LogLevel::Error, None));

        assert_eq!(errors.recv().await.unwrap().seq, 2);
        assert_eq!(all.recv().await.unwrap().seq, 1);
        assert_eq!(all.recv().await.unwrap().seq, 2);

        drop(errors);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped() {
        let set = Arc::new(SubscriberSet::new());
        let mut slow = SubscriberSet::subscribe(&set, StreamFilter::default());

        for n in 0..=SUBSCRIBER_QUEUE as u64 {
            set.broadcast(&entry(n, LogLevel::Info, None));
        }
        assert!(set.is_empty());

        // Queued entries still drain, then the stream ends.
        let mut received = 0;
        while slow.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[tokio::test]
    async fn history_overlap_is_delivered_once() {
        let set = Arc::new(SubscriberSet::new());
        let first = entry(7, LogLevel::Info, None);
        let mut sub = SubscriberSet::subscribe(&set, StreamFilter::default()).with_history(vec![first.clone()]);

        set.broadcast(&first);
        set.broadcast(&entry(8, LogLevel::Info, None));

        assert_eq!(sub.take_history().len(), 1);
        assert_eq!(sub.recv().await.unwrap().seq, 8);
    }
}
