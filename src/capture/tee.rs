//! Response body tee.
//!
//! [`CaptureBody`] forwards every frame of the wrapped body unchanged while
//! copying at most `limit` bytes into a [`BodySnapshot`]. When the stream ends,
//! fails, or is dropped early (client went away) the completion callback runs
//! exactly once with what was observed.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use super::body::BodySnapshot;

/// What a [`CaptureBody`] saw by the time it completed.
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub snapshot: BodySnapshot,
    /// Set when the stream failed or was abandoned before its end.
    pub error: Option<String>,
}

type OnComplete = Box<dyn FnOnce(CaptureOutcome) + Send + 'static>;

/// A body wrapper that tees data into a bounded snapshot.
pub struct CaptureBody<B> {
    inner: B,
    snapshot: BodySnapshot,
    on_complete: Option<OnComplete>,
}

impl<B> CaptureBody<B> {
    pub fn new<F>(inner: B, limit: usize, on_complete: F) -> Self
    where
        F: FnOnce(CaptureOutcome) + Send + 'static,
    {
        Self {
            inner,
            snapshot: BodySnapshot::new(limit),
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn complete(&mut self, error: Option<String>) {
        if let Some(callback) = self.on_complete.take() {
            if error.is_none() {
                self.snapshot.finish();
            }
            callback(CaptureOutcome {
                snapshot: std::mem::take(&mut self.snapshot),
                error,
            });
        }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.snapshot.push(data);
                }
                if this.inner.is_end_stream() {
                    this.complete(None);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.complete(Some(e.to_string()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.complete(None);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            self.complete(Some("client disconnected before response completed".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<CaptureOutcome>>>, impl FnOnce(CaptureOutcome) + Send) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |outcome| sink.lock().unwrap().push(outcome))
    }

    #[tokio::test]
    async fn forwards_unchanged_and_reports_once() {
        let (seen, cb) = recorder();
        let body = CaptureBody::new(Full::new(Bytes::from_static(b"hello world")), 5, cb);

        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(&out[..], b"hello world");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].error.is_none());
        assert_eq!(seen[0].snapshot.total_len(), 11);
        assert_eq!(
            seen[0].snapshot.to_value(Some("text/plain")),
            serde_json::Value::String("hello... [truncated, 11 bytes total]".into())
        );
    }

    #[tokio::test]
    async fn multi_chunk_stream_is_captured() {
        let (seen, cb) = recorder();
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"{\"ok\":"))),
            Ok(Frame::data(Bytes::from_static(b"true}"))),
        ]);
        let body = CaptureBody::new(StreamBody::new(chunks), 1024, cb);

        let out = body.collect().await.unwrap().to_bytes();
        assert_eq!(&out[..], b"{\"ok\":true}");

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].snapshot.to_value(Some("application/json")),
            serde_json::json!({"ok": true})
        );
    }

    #[tokio::test]
    async fn dropping_early_reports_disconnect() {
        let (seen, cb) = recorder();
        let chunks = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(Frame::data(Bytes::from_static(b"part"))),
        ])
        .chain(futures_util::stream::pending());
        let mut body = CaptureBody::new(StreamBody::new(Box::pin(chunks)), 1024, cb);

        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), Bytes::from_static(b"part"));
        drop(body);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].error.as_deref().unwrap().contains("disconnected"));
        assert_eq!(seen[0].snapshot.total_len(), 4);
    }
}
