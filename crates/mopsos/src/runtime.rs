// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for mopsos.
//!
//! [`IngestRuntime`] owns the event queue, the record handler task and the HTTP
//! server task. It can run standalone (see `main.rs`) or inside another tokio
//! application.
//!
//! # Example
//!
//! ```rust,ignore
//! use mopsos::IngestRuntime;
//! use mopsos::persistence::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::in_memory().await?);
//!
//!     let runtime = IngestRuntime::builder()
//!         .store(store)
//!         .bind_addr("127.0.0.1:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Stop accepting requests, then drain queued events
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::auth::IdentityStore;
use crate::config::Config;
use crate::handler::{HandlerSummary, RecordHandler};
use crate::persistence::RecordStore;
use crate::queue::event_queue;
use crate::server::{AppState, router};

const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
    8080,
);

/// Builder for creating an [`IngestRuntime`].
pub struct IngestRuntimeBuilder {
    store: Option<Arc<dyn RecordStore>>,
    identities: IdentityStore,
    bind_addr: SocketAddr,
    queue_capacity: usize,
    enable_tracing: bool,
    drain_timeout: Duration,
}

impl std::fmt::Debug for IngestRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRuntimeBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("identities", &self.identities)
            .field("bind_addr", &self.bind_addr)
            .field("queue_capacity", &self.queue_capacity)
            .field("enable_tracing", &self.enable_tracing)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl Default for IngestRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            identities: IdentityStore::default(),
            bind_addr: DEFAULT_BIND_ADDR,
            queue_capacity: 0,
            enable_tracing: false,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl IngestRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take listener, credentials, queue, tracing and drain settings from a [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.identities = config.identity_store();
        self.bind_addr = config.http_listener;
        self.queue_capacity = config.queue_capacity;
        self.enable_tracing = config.enable_tracing;
        self.drain_timeout = config.shutdown_drain;
        self
    }

    /// Set the record store (required).
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the Basic auth credential table.
    pub fn identities(mut self, identities: IdentityStore) -> Self {
        self.identities = identities;
        self
    }

    /// Set the HTTP listen address. Port `0` picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the queue capacity (`0` = rendezvous).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable trace context propagation from requests to upserts.
    pub fn enable_tracing(mut self, enable: bool) -> Self {
        self.enable_tracing = enable;
        self
    }

    /// Set how long [`IngestRuntime::shutdown`] may take.
    ///
    /// Default: 10 seconds
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<IngestRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;

        if self.identities.is_empty() {
            warn!("No Basic auth users configured, every webhook request will be rejected");
        }

        Ok(IngestRuntimeConfig {
            store,
            identities: Arc::new(self.identities),
            bind_addr: self.bind_addr,
            queue_capacity: self.queue_capacity,
            enable_tracing: self.enable_tracing,
            drain_timeout: self.drain_timeout,
        })
    }
}

/// Configuration for an [`IngestRuntime`].
pub struct IngestRuntimeConfig {
    store: Arc<dyn RecordStore>,
    identities: Arc<IdentityStore>,
    bind_addr: SocketAddr,
    queue_capacity: usize,
    enable_tracing: bool,
    drain_timeout: Duration,
}

impl std::fmt::Debug for IngestRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRuntimeConfig")
            .field("store", &"...")
            .field("bind_addr", &self.bind_addr)
            .field("queue_capacity", &self.queue_capacity)
            .field("enable_tracing", &self.enable_tracing)
            .field("drain_timeout", &self.drain_timeout)
            .finish()
    }
}

impl IngestRuntimeConfig {
    /// Bind the listener, then spawn the record handler and the HTTP server.
    pub async fn start(self) -> Result<IngestRuntime> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let (events, receiver) = event_queue(self.queue_capacity);
        let handler = RecordHandler::new(self.store.clone(), self.enable_tracing);
        let consumer_handle = tokio::spawn(handler.run(receiver));

        let state = AppState {
            identities: self.identities,
            events,
            store: self.store.clone(),
            enable_tracing: self.enable_tracing,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(serve_with_shutdown(listener, state, shutdown_rx));

        info!(
            addr = %local_addr,
            queue_capacity = self.queue_capacity,
            "IngestRuntime started"
        );

        Ok(IngestRuntime {
            server_handle,
            consumer_handle,
            shutdown_tx,
            store: self.store,
            local_addr,
            drain_timeout: self.drain_timeout,
        })
    }
}

/// A running mopsos instance.
///
/// The runtime manages:
/// - the HTTP server accepting webhook requests
/// - the record handler consuming the event queue
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct IngestRuntime {
    server_handle: JoinHandle<Result<()>>,
    consumer_handle: JoinHandle<HandlerSummary>,
    shutdown_tx: watch::Sender<bool>,
    store: Arc<dyn RecordStore>,
    local_addr: SocketAddr,
    drain_timeout: Duration,
}

impl std::fmt::Debug for IngestRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRuntime")
            .field("local_addr", &self.local_addr)
            .field("drain_timeout", &self.drain_timeout)
            .field("running", &self.is_running())
            .finish()
    }
}

impl IngestRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> IngestRuntimeBuilder {
        IngestRuntimeBuilder::new()
    }

    /// The address the HTTP server is actually listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Check if the HTTP server and the record handler are still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.consumer_handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting requests and waits for in-flight ones, which drops the last
    /// queue sender. Then waits for the record handler to persist what is still
    /// queued. The whole sequence is bounded by the drain timeout; on expiry the
    /// handler is aborted and an error is returned.
    pub async fn shutdown(self) -> Result<HandlerSummary> {
        info!("IngestRuntime shutting down...");
        let deadline = Instant::now() + self.drain_timeout;

        let _ = self.shutdown_tx.send(true);

        let mut server_handle = self.server_handle;
        match tokio::time::timeout_at(deadline, &mut server_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "HTTP server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
            Err(_) => {
                warn!("HTTP server did not stop within the drain timeout");
                server_handle.abort();
            }
        }

        let mut consumer_handle = self.consumer_handle;
        match tokio::time::timeout_at(deadline, &mut consumer_handle).await {
            Ok(Ok(summary)) => {
                info!(
                    persisted = summary.persisted,
                    failed = summary.failed,
                    "IngestRuntime shutdown complete"
                );
                Ok(summary)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Record handler task panicked");
                Err(anyhow::anyhow!("record handler task panicked: {}", e))
            }
            Err(_) => {
                consumer_handle.abort();
                error!(
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Record handler did not drain the queue in time"
                );
                Err(anyhow::anyhow!(
                    "record handler did not drain within {:?}",
                    self.drain_timeout
                ))
            }
        }
    }
}

/// Run the HTTP server until the shutdown flag flips.
async fn serve_with_shutdown(
    listener: TcpListener,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            info!("HTTP server received shutdown signal");
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
