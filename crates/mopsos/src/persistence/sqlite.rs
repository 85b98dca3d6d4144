// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed record store.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::error::StoreError;
use crate::migrations;
use crate::record::{IdentityKey, Record, StoredRecord};

use super::RecordStore;

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite DSN.
    ///
    /// In-memory databases (`sqlite::memory:`, `mode=memory`) use a single
    /// connection that is never recycled, so the data lives as long as the pool.
    /// For file databases the parent directory and the file are created if needed.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let in_memory = dsn.contains(":memory:") || dsn.contains("mode=memory");

        if !in_memory
            && let Some(parent) = file_path(dsn).and_then(Path::parent)
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(dsn)?.create_if_missing(true);

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Ok(Self { pool })
    }

    /// Connect to a fresh in-memory database and apply migrations.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let store = Self::connect("sqlite::memory:").await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Apply the embedded SQLite migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run_sqlite(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn file_path(dsn: &str) -> Option<&Path> {
    let rest = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    (!path.is_empty()).then(|| Path::new(path))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_record(&self, record: &Record) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO records (
                created_at, updated_at, deleted_at,
                cluster_name, instance_id, application_name, application_instance,
                application_version
            )
            VALUES (?, ?, NULL, ?, ?, ?, ?, ?)
            ON CONFLICT (cluster_name, instance_id, application_name, application_instance)
            DO UPDATE SET
                application_version = excluded.application_version,
                updated_at = excluded.updated_at,
                deleted_at = NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(&record.cluster_name)
        .bind(&record.instance_id)
        .bind(&record.application_name)
        .bind(&record.application_instance)
        .bind(&record.application_version)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_record(&self, identity: &IdentityKey) -> Result<Option<StoredRecord>, StoreError> {
        let record = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT id, created_at, updated_at, deleted_at,
                   cluster_name, instance_id, application_name, application_instance,
                   application_version
            FROM records
            WHERE cluster_name = ? AND instance_id = ?
              AND application_name = ? AND application_instance = ?
              AND deleted_at IS NULL
            "#,
        )
        .bind(&identity.cluster_name)
        .bind(&identity.instance_id)
        .bind(&identity.application_name)
        .bind(&identity.application_instance)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_records(&self, cluster_name: &str) -> Result<Vec<StoredRecord>, StoreError> {
        let records = sqlx::query_as::<_, StoredRecord>(
            r#"
            SELECT id, created_at, updated_at, deleted_at,
                   cluster_name, instance_id, application_name, application_instance,
                   application_version
            FROM records
            WHERE cluster_name = ? AND deleted_at IS NULL
            ORDER BY application_name, application_instance, instance_id
            "#,
        )
        .bind(cluster_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn count_records(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM records WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
