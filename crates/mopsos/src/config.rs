// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::auth::IdentityStore;
use crate::persistence::{DbProvider, StoreConfig};

const DEFAULT_SQLITE_DSN: &str = "sqlite::memory:";

/// Mopsos service configuration
#[derive(Clone)]
pub struct Config {
    /// Storage backend to connect to
    pub db_provider: DbProvider,
    /// Connection string for the storage backend
    pub db_dsn: String,
    /// Whether to apply embedded migrations on startup
    pub db_migrate: bool,
    /// HTTP listener address for the webhook receiver
    pub http_listener: SocketAddr,
    /// Basic auth credential table (username -> secret)
    pub basic_auth_users: HashMap<String, String>,
    /// Enable trace context propagation and OTLP export
    pub enable_tracing: bool,
    /// OTLP collector endpoint
    pub tracing_target: String,
    /// Ingestion queue capacity; 0 means every enqueue waits for the consumer
    pub queue_capacity: usize,
    /// Upper bound for draining queued events on shutdown
    pub shutdown_drain: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `MOPSOS_DB_PROVIDER`: `sqlite` or `postgres` (default: sqlite)
    /// - `MOPSOS_DB_DSN`: connection string (default: in-memory SQLite, required for postgres)
    /// - `MOPSOS_DB_MIGRATE`: run migrations on startup (default: true)
    /// - `MOPSOS_HTTP_LISTENER`: listen address, `:port` shorthand allowed (default: 0.0.0.0:8080)
    /// - `MOPSOS_BASIC_AUTH_USERS`: `user:secret` pairs separated by commas
    /// - `MOPSOS_OTEL`: enable tracing (default: false)
    /// - `MOPSOS_OTEL_COLLECTOR`: OTLP endpoint (default: http://localhost:30079)
    /// - `MOPSOS_QUEUE_CAPACITY`: ingestion queue capacity (default: 0)
    /// - `MOPSOS_SHUTDOWN_DRAIN_SECS`: drain timeout on shutdown (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_provider: DbProvider = env_or("MOPSOS_DB_PROVIDER", "sqlite")
            .parse()
            .map_err(|_| ConfigError::Invalid("MOPSOS_DB_PROVIDER", "must be 'sqlite' or 'postgres'"))?;

        let db_dsn = match (std::env::var("MOPSOS_DB_DSN"), db_provider) {
            (Ok(dsn), _) if !dsn.trim().is_empty() => dsn,
            (_, DbProvider::Sqlite) => DEFAULT_SQLITE_DSN.to_string(),
            (_, DbProvider::Postgres) => return Err(ConfigError::Missing("MOPSOS_DB_DSN")),
        };

        let db_migrate = parse_bool(&env_or("MOPSOS_DB_MIGRATE", "true"))
            .ok_or(ConfigError::Invalid("MOPSOS_DB_MIGRATE", "must be a boolean"))?;

        let http_listener = parse_listener(&env_or("MOPSOS_HTTP_LISTENER", "0.0.0.0:8080"))
            .ok_or(ConfigError::Invalid(
                "MOPSOS_HTTP_LISTENER",
                "must be an address like 0.0.0.0:8080 or :8080",
            ))?;

        let basic_auth_users = parse_users(&env_or("MOPSOS_BASIC_AUTH_USERS", ""))?;

        let enable_tracing = parse_bool(&env_or("MOPSOS_OTEL", "false"))
            .ok_or(ConfigError::Invalid("MOPSOS_OTEL", "must be a boolean"))?;

        let tracing_target = env_or("MOPSOS_OTEL_COLLECTOR", "http://localhost:30079");

        let queue_capacity: usize = env_or("MOPSOS_QUEUE_CAPACITY", "0")
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MOPSOS_QUEUE_CAPACITY", "must be a non-negative integer")
            })?;

        let drain_secs: u64 = env_or("MOPSOS_SHUTDOWN_DRAIN_SECS", "10")
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("MOPSOS_SHUTDOWN_DRAIN_SECS", "must be a number of seconds")
            })?;

        Ok(Self {
            db_provider,
            db_dsn,
            db_migrate,
            http_listener,
            basic_auth_users,
            enable_tracing,
            tracing_target,
            queue_capacity,
            shutdown_drain: Duration::from_secs(drain_secs),
        })
    }

    /// Storage settings for [`crate::persistence::open_store`].
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            provider: self.db_provider,
            dsn: self.db_dsn.clone(),
            migrate: self.db_migrate,
        }
    }

    /// Credential table for the webhook authenticator.
    pub fn identity_store(&self) -> IdentityStore {
        IdentityStore::new(self.basic_auth_users.clone())
    }
}

// Secrets and DSN passwords stay out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.basic_auth_users.keys().map(String::as_str).collect();
        users.sort_unstable();

        f.debug_struct("Config")
            .field("db_provider", &self.db_provider)
            .field("db_dsn", &redact_dsn(&self.db_dsn))
            .field("db_migrate", &self.db_migrate)
            .field("http_listener", &self.http_listener)
            .field("basic_auth_users", &users)
            .field("enable_tracing", &self.enable_tracing)
            .field("tracing_target", &self.tracing_target)
            .field("queue_capacity", &self.queue_capacity)
            .field("shutdown_drain", &self.shutdown_drain)
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_listener(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    if let Some(port) = value.strip_prefix(':') {
        let port: u16 = port.parse().ok()?;
        return Some(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    value.parse().ok()
}

fn parse_users(value: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut users = HashMap::new();
    for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (user, secret) = pair.split_once(':').ok_or(ConfigError::Invalid(
            "MOPSOS_BASIC_AUTH_USERS",
            "entries must look like user:secret",
        ))?;
        let user = user.trim();
        if user.is_empty() {
            return Err(ConfigError::Invalid(
                "MOPSOS_BASIC_AUTH_USERS",
                "usernames must not be empty",
            ));
        }
        users.insert(user.to_string(), secret.to_string());
    }
    Ok(users)
}

fn redact_dsn(dsn: &str) -> String {
    let Some((scheme, rest)) = dsn.split_once("://") else {
        return dsn.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return dsn.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => dsn.to_string(),
    }
}
