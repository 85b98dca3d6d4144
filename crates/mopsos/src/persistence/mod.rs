// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record storage interface and backends.
//!
//! Two backends ship: SQLite (the default, in-memory unless a file DSN is given)
//! and PostgreSQL. [`open_store`] connects the configured one and optionally
//! applies the embedded migrations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::record::{IdentityKey, Record, StoredRecord};

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbProvider {
    /// SQLite via `sqlx::SqlitePool`.
    Sqlite,
    /// PostgreSQL via `sqlx::PgPool`.
    Postgres,
}

impl FromStr for DbProvider {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(StoreError::UnsupportedProvider(other.to_string())),
        }
    }
}

impl fmt::Display for DbProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Connection settings for [`open_store`].
#[derive(Clone)]
pub struct StoreConfig {
    /// Backend to connect.
    pub provider: DbProvider,
    /// Connection string.
    pub dsn: String,
    /// Apply embedded migrations after connecting.
    pub migrate: bool,
}

/// Storage for inventory records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert the record, or on identity conflict overwrite its version, bump
    /// `updated_at` and clear `deleted_at`.
    async fn upsert_record(&self, record: &Record) -> Result<(), StoreError>;

    /// Fetch a live record by identity.
    async fn get_record(&self, identity: &IdentityKey) -> Result<Option<StoredRecord>, StoreError>;

    /// All live records of a cluster, ordered by application and instance.
    async fn list_records(&self, cluster_name: &str) -> Result<Vec<StoredRecord>, StoreError>;

    /// Number of live records.
    async fn count_records(&self) -> Result<i64, StoreError>;

    /// Check database connectivity.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Connect the configured backend, running migrations when enabled.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, StoreError> {
    tracing::info!(
        provider = %config.provider,
        migrate = config.migrate,
        "Opening record store"
    );

    match config.provider {
        DbProvider::Sqlite => {
            let store = SqliteStore::connect(&config.dsn).await?;
            if config.migrate {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
        DbProvider::Postgres => {
            let store = PostgresStore::connect(&config.dsn).await?;
            if config.migrate {
                store.migrate().await?;
            }
            Ok(Arc::new(store))
        }
    }
}
