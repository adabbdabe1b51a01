//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Own process-scoped state: route snapshot, logger, traces, upstream pools
//! - Apply configuration events (swap routes and levels, keep state on error)
//! - Run the trace reaper and stop everything on shutdown

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::trace::TraceLayer;

use crate::config::{ConfigEvent, ProxyConfig};
use crate::http::proxy::proxy_handler;
use crate::http::upstream::UpstreamPools;
use crate::observability::{LogLevel, Logger, TraceManager, SYSTEM_TRACE_ID};
use crate::routing::RouteTable;

/// Immutable view of one configuration revision.
pub struct Snapshot {
    pub routes: RouteTable,
    pub config: ProxyConfig,
}

impl Snapshot {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            routes: RouteTable::from_config(&config.routes),
            config,
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<Snapshot>>,
    pub logger: Arc<Logger>,
    pub traces: Arc<TraceManager>,
    pub upstream: Arc<UpstreamPools>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let logger = Arc::new(Logger::from_config(&config));
        let tracing_config = &config.global.tracing;
        let traces = Arc::new(TraceManager::new(
            Duration::from_secs(tracing_config.retention_secs),
            tracing_config.trust_incoming,
        ));
        traces.set_stale_after(stale_after(&config));
        let upstream = Arc::new(UpstreamPools::new(&config.global));

        Self {
            inner: Arc::new(ArcSwap::from_pointee(Snapshot::new(config))),
            logger,
            traces,
            upstream,
        }
    }

    /// Current snapshot; requests hold it for their whole lifetime.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.load_full()
    }

    /// Swap in a new configuration revision.
    pub fn apply(&self, config: ProxyConfig) {
        self.logger.update_levels(&config);
        self.traces
            .set_trust_incoming(config.global.tracing.trust_incoming);
        self.traces.set_stale_after(stale_after(&config));
        let snapshot = Snapshot::new(config);
        tracing::info!(routes = snapshot.routes.len(), "Route table swapped");
        self.inner.store(Arc::new(snapshot));
    }

    /// React to one event from the config store.
    pub fn handle_config_event(&self, event: ConfigEvent) {
        match event {
            ConfigEvent::Loaded(config) => self.apply(config),
            ConfigEvent::Changed(config) => {
                let routes = config.routes.len();
                self.apply(config);
                self.logger.log(
                    LogLevel::Info,
                    "Configuration reloaded",
                    SYSTEM_TRACE_ID,
                    None,
                    Some(serde_json::json!({ "routes": routes })),
                );
            }
            ConfigEvent::Error(e) => {
                self.logger.log(
                    LogLevel::Error,
                    format!("Configuration error, keeping previous configuration: {e}"),
                    SYSTEM_TRACE_ID,
                    None,
                    None,
                );
            }
        }
    }
}

/// An in-flight trace older than this can no longer be waiting on upstream.
fn stale_after(config: &ProxyConfig) -> Duration {
    config.global.upstream_timeout() + Duration::from_secs(config.global.tracing.retention_secs)
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_state(AppState::new(config))
    }

    pub fn with_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Config events are applied until the channel closes; shutdown drains
    /// connections, stops the reaper and clears process-scoped state.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_events: mpsc::UnboundedReceiver<ConfigEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (stop_tx, _) = broadcast::channel::<()>(1);
        let reaper = self.state.traces.clone().spawn_reaper(stop_tx.subscribe());

        let state = self.state.clone();
        let mut stop_events = stop_tx.subscribe();
        let events = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = config_events.recv() => match event {
                        Some(event) => state.handle_config_event(event),
                        None => break,
                    },
                    _ = stop_events.recv() => break,
                }
            }
        });

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        let _ = stop_tx.send(());
        let _ = reaper.await;
        let _ = events.await;
        self.state.traces.clear();
        self.state.logger.clear();

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
