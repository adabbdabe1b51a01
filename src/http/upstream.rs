//! Upstream connection pools.
//!
//! # Responsibilities
//! - Keep-alive pools for plain and TLS targets
//! - Cap concurrent upstream exchanges per pool
//! - Bound connect + response-head time with the upstream timeout
//! - Open dedicated (unpooled) connections for WebSocket upgrades
//!
//! # Design Decisions
//! - One shared client per scheme; hyper_util pools per host internally
//! - The concurrency permit lives inside the response body, so a slot is
//!   released only when the body is fully consumed or dropped
//! - Pools are built once at startup; config reloads do not rebuild them

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::Scheme;
use axum::http::{Request, Response, Uri};
use http_body_util::BodyExt;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use crate::config::{GlobalConfig, PoolConfig};
use crate::http::request::TargetError;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Stream of a dedicated upstream connection.
pub type DedicatedStream = MaybeHttpsStream<TokioIo<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("upstream pool closed")]
    PoolClosed,

    #[error("{}", describe_chain(.0))]
    Client(#[source] hyper_util::client::legacy::Error),

    #[error("connect failed: {}", describe_chain(.0.as_ref()))]
    Connect(#[source] BoxError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] hyper::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Target(#[from] TargetError),
}

impl UpstreamError {
    /// Refused/reset style failures, expected while a local target restarts.
    pub fn is_transient(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionRefused
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                ) {
                    return true;
                }
            }
            current = err.source();
        }
        false
    }
}

/// `outer: inner: root` for an error and its sources.
pub fn describe_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        current = source.source();
    }
    message
}

/// A pooled client plus its concurrency cap.
pub struct UpstreamPool<C> {
    client: Client<C, Body>,
    permits: Arc<Semaphore>,
}

impl<C> UpstreamPool<C>
where
    C: hyper_util::client::legacy::connect::Connect + Clone + Send + Sync + 'static,
{
    fn new(connector: C, pool: &PoolConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_millis(pool.idle_timeout_ms))
            .pool_max_idle_per_host(pool.max_idle_sockets)
            .pool_timer(TokioTimer::new())
            .build(connector);
        Self {
            client,
            permits: Arc::new(Semaphore::new(pool.max_sockets.max(1))),
        }
    }

    /// Exchanges currently allowed to start.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Plain and TLS pools plus the WebSocket connector.
pub struct UpstreamPools {
    plain: UpstreamPool<HttpConnector>,
    tls: UpstreamPool<HttpsConnector<HttpConnector>>,
    dedicated: HttpsConnector<HttpConnector>,
    timeout: Duration,
}

impl UpstreamPools {
    pub fn new(global: &GlobalConfig) -> Self {
        let timeout = global.upstream_timeout();

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.set_connect_timeout(Some(timeout));

        // The TLS wrappers dial through the same tuned connector.
        let mut inner = http.clone();
        inner.enforce_http(false);

        let tls = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .wrap_connector(inner.clone());

        let dedicated = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(inner);

        tracing::debug!(
            max_sockets = global.pool.max_sockets,
            max_idle_sockets = global.pool.max_idle_sockets,
            idle_timeout_ms = global.pool.idle_timeout_ms,
            "Upstream pools created"
        );

        Self {
            plain: UpstreamPool::new(http, &global.pool),
            tls: UpstreamPool::new(tls, &global.pool),
            dedicated,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send through the pool matching the URI scheme.
    pub async fn send(&self, req: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let https = req.uri().scheme() == Some(&Scheme::HTTPS);
        let permits = if https {
            self.tls.permits.clone()
        } else {
            self.plain.permits.clone()
        };

        let exchange = async {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| UpstreamError::PoolClosed)?;
            let response = if https {
                self.tls.client.request(req).await
            } else {
                self.plain.client.request(req).await
            }
            .map_err(UpstreamError::Client)?;
            Ok::<_, UpstreamError>((permit, response))
        };

        let (permit, response) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))??;

        let (parts, body) = response.into_parts();
        let body = body.map_frame(move |frame| {
            let _held = &permit;
            frame
        });
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Open an unpooled connection for a protocol upgrade.
    pub async fn connect_dedicated(&self, uri: Uri) -> Result<DedicatedStream, UpstreamError> {
        let connect = self.dedicated.clone().oneshot(uri);
        tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| UpstreamError::Timeout(self.timeout))?
            .map_err(UpstreamError::Connect)
    }
}
