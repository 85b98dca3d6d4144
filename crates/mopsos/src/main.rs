// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mopsos - CloudEvents ingestion service
//!
//! Mopsos is responsible for:
//! - Authenticating webhook senders (HTTP Basic)
//! - Decoding CloudEvents and checking them against the sender identity
//! - Upserting the latest application state per cluster

use anyhow::Result;
use tracing::{error, info};

use mopsos::IngestRuntime;
use mopsos::config::Config;
use mopsos::persistence::open_store;
use mopsos::telemetry::{self, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?;

    let _telemetry = telemetry::init_subscriber(&TelemetryConfig::from(&config))?;

    info!("Starting Mopsos");
    info!(
        http_listener = %config.http_listener,
        db_provider = %config.db_provider,
        queue_capacity = config.queue_capacity,
        users = config.basic_auth_users.len(),
        "Configuration loaded"
    );

    let store = open_store(&config.store_config()).await.map_err(|e| {
        error!(error_code = e.error_code(), error = %e, "Failed to open record store");
        e
    })?;
    store.ping().await?;
    info!("Database health check passed");

    let runtime = IngestRuntime::builder()
        .config(&config)
        .store(store)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Mopsos initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
