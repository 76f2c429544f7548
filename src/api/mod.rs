//! Runtime control surface
//!
//! Start a dev server from a validated [`ServerConfig`], observe it, stop it.

use crate::config::{ServerConfig, UpstreamScheme};
use crate::error::ConfigError;
use crate::models::ProxyExchange;
use crate::proxy::server::{bind_listener, run_server, ServerState};
use crate::proxy::upstream::{TcpConnector, UpstreamConnector};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Snapshot of a running server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    pub addr: SocketAddr,
    pub total_requests: u64,
    pub proxied_requests: u64,
    pub failed_requests: u64,
}

pub struct ServerHandle {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Validate `config`, bind the listener and spawn the accept loop.
pub async fn start(config: ServerConfig) -> Result<ServerHandle, ConfigError> {
    let needs_tls = config.proxy().entries().iter().any(|entry| {
        entry
            .rule
            .upstream()
            .map(|upstream| upstream.scheme == UpstreamScheme::Https)
            .unwrap_or(false)
    });
    start_with_connector(config, Arc::new(TcpConnector::new(needs_tls))).await
}

/// Like [`start`], with a caller-supplied way of reaching upstreams.
pub async fn start_with_connector(
    config: ServerConfig,
    connector: Arc<dyn UpstreamConnector>,
) -> Result<ServerHandle, ConfigError> {
    config.validate()?;

    for plugin in &config.plugins {
        tracing::info!("Plugin enabled: {}", plugin);
    }
    for entry in config.proxy().entries() {
        tracing::info!(
            "Proxy {} -> {}{}",
            entry.prefix,
            entry.rule.target,
            if entry.rule.change_origin {
                " (changeOrigin)"
            } else {
                ""
            }
        );
    }
    if let Some(root) = &config.root {
        tracing::info!("Serving static files from {}", root.display());
    }

    let state = Arc::new(ServerState::new(&config, connector)?);
    let listener = bind_listener(config.bind_host(), config.port(), config.server.strict_port).await?;
    let local_addr = listener.local_addr().map_err(|source| ConfigError::Bind {
        addr: format!("{}:{}", config.bind_host(), config.port()),
        source,
    })?;

    let server_state = state.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = run_server(listener, server_state.clone()).await {
            tracing::error!("Dev server error: {}", e);
        }
        // If server exits, ensure flag is cleared
        server_state.running.store(false, Ordering::SeqCst);
    });

    Ok(ServerHandle {
        state,
        local_addr,
        task,
    })
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            running: self.state.is_running(),
            addr: self.local_addr,
            total_requests: self.state.total_requests.load(Ordering::Relaxed),
            proxied_requests: self.state.proxied_requests.load(Ordering::Relaxed),
            failed_requests: self.state.failed_requests.load(Ordering::Relaxed),
        }
    }

    /// Receive a copy of every exchange from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyExchange> {
        self.state.subscribe()
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// Connections already being served run to completion.
    pub async fn stop(self) {
        tracing::info!("Stopping dev server on {}", self.local_addr);
        self.state.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            tracing::error!("Dev server task failed: {}", e);
        }
    }
}
