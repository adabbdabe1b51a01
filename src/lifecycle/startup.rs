//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build process-scoped state (logger, traces, pools, routes)
//! - Bind the proxy and log stream listeners
//! - Start the config watcher and server tasks
//!
//! # Design Decisions
//! - Fail fast: a bad initial config or a busy port is fatal
//! - Listeners bind before any task starts (traffic only when ready)
//! - Later config errors are reported as events and never stop the server

use std::net::SocketAddr;
use std::path::Path;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin;
use crate::config::{ConfigError, ConfigEvent, ConfigWatcher, ProxyConfig};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch configuration: {0}")]
    Watch(#[from] notify::Error),
}

/// Overrides applied on top of the file, mainly for tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Replace `global.host`/`global.port` (e.g. `127.0.0.1:0`).
    pub proxy_address: Option<String>,
    /// Replace `global.logging.streamAddress`.
    pub stream_address: Option<String>,
    /// Watch the file for changes.
    pub watch: bool,
}

/// A started proxy.
pub struct Running {
    pub proxy_addr: SocketAddr,
    pub stream_addr: Option<SocketAddr>,
    state: AppState,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Running {
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Trigger shutdown and wait for every task to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.wait().await;
    }

    /// Wait for the tasks to finish (after an external trigger).
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

/// Load `config_path` and start serving.
pub async fn launch(config_path: &Path, options: LaunchOptions) -> Result<Running, StartupError> {
    let (watcher, events) = ConfigWatcher::new(config_path);
    let mut config = watcher.load_initial()?;
    apply_overrides(&mut config, &options);

    tracing::info!(
        path = %config_path.display(),
        routes = config.routes.len(),
        "Configuration loaded"
    );

    let proxy_listener = bind(&config.global.bind_address()).await?;
    let proxy_addr = local_addr(&proxy_listener, &config.global.bind_address())?;

    let stream_listener = match &config.global.logging.stream_address {
        Some(address) => Some(bind(address).await?),
        None => None,
    };
    let stream_addr = match &stream_listener {
        Some(listener) => listener.local_addr().ok(),
        None => None,
    };

    let watcher = if options.watch {
        Some(watcher.run()?)
    } else {
        None
    };

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let state = server.state();
    let mut tasks = Vec::new();

    // Overrides must survive reloads; re-apply them on every event.
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut events = events;
    let mut forward_shutdown = shutdown.subscribe();
    let forward_options = options.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = forward_shutdown.recv() => break,
            };
            let event = match event {
                ConfigEvent::Changed(mut config) => {
                    apply_overrides(&mut config, &forward_options);
                    ConfigEvent::Changed(config)
                }
                ConfigEvent::Loaded(_) => continue,
                other => other,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    }));

    let proxy_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(proxy_listener, rx, proxy_shutdown).await {
            tracing::error!(error = %e, "Proxy server failed");
        }
    }));

    if let Some(listener) = stream_listener {
        let stream_state = state.clone();
        let stream_shutdown = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, stream_state, stream_shutdown).await {
                tracing::error!(error = %e, "Log stream endpoint failed");
            }
        }));
    }

    tracing::info!(address = %proxy_addr, "Proxy listening");

    Ok(Running {
        proxy_addr,
        stream_addr,
        state,
        shutdown,
        tasks,
        _watcher: watcher,
    })
}

fn apply_overrides(config: &mut ProxyConfig, options: &LaunchOptions) {
    if let Some(address) = &options.proxy_address {
        if let Some((host, port)) = address.rsplit_once(':') {
            config.global.host = host.to_string();
            if let Ok(port) = port.parse() {
                config.global.port = port;
            }
        }
    }
    if let Some(address) = &options.stream_address {
        config.global.logging.stream_address = Some(address.clone());
    }
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}

fn local_addr(listener: &TcpListener, address: &str) -> Result<SocketAddr, StartupError> {
    listener.local_addr().map_err(|source| StartupError::Bind {
        address: address.to_string(),
        source,
    })
}
