// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed record store.
//!
//! Queries are plain functions over a `PgPool` so they can be reused by tooling;
//! [`PostgresStore`] wires them into [`RecordStore`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::StoreError;
use crate::migrations;
use crate::record::{IdentityKey, Record, StoredRecord};

use super::RecordStore;

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a PostgreSQL DSN.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(5).connect(dsn).await?;
        Ok(Self { pool })
    }

    /// Apply the embedded PostgreSQL migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        migrations::run_postgres(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Record Operations
// ============================================================================

/// Insert or refresh a record keyed by its identity tuple.
pub async fn upsert_record(pool: &PgPool, record: &Record) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO records (
            created_at, updated_at, deleted_at,
            cluster_name, instance_id, application_name, application_instance,
            application_version
        )
        VALUES ($1, $1, NULL, $2, $3, $4, $5, $6)
        ON CONFLICT (cluster_name, instance_id, application_name, application_instance)
        DO UPDATE SET
            application_version = EXCLUDED.application_version,
            updated_at = EXCLUDED.updated_at,
            deleted_at = NULL
        "#,
    )
    .bind(Utc::now())
    .bind(&record.cluster_name)
    .bind(&record.instance_id)
    .bind(&record.application_name)
    .bind(&record.application_instance)
    .bind(&record.application_version)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a live record by identity.
pub async fn get_record(
    pool: &PgPool,
    identity: &IdentityKey,
) -> Result<Option<StoredRecord>, StoreError> {
    let record = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, created_at, updated_at, deleted_at,
               cluster_name, instance_id, application_name, application_instance,
               application_version
        FROM records
        WHERE cluster_name = $1 AND instance_id = $2
          AND application_name = $3 AND application_instance = $4
          AND deleted_at IS NULL
        "#,
    )
    .bind(&identity.cluster_name)
    .bind(&identity.instance_id)
    .bind(&identity.application_name)
    .bind(&identity.application_instance)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// List the live records of a cluster.
pub async fn list_records(
    pool: &PgPool,
    cluster_name: &str,
) -> Result<Vec<StoredRecord>, StoreError> {
    let records = sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT id, created_at, updated_at, deleted_at,
               cluster_name, instance_id, application_name, application_instance,
               application_version
        FROM records
        WHERE cluster_name = $1 AND deleted_at IS NULL
        ORDER BY application_name, application_instance, instance_id
        "#,
    )
    .bind(cluster_name)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Count live records.
pub async fn count_records(pool: &PgPool) -> Result<i64, StoreError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn upsert_record(&self, record: &Record) -> Result<(), StoreError> {
        upsert_record(&self.pool, record).await
    }

    async fn get_record(&self, identity: &IdentityKey) -> Result<Option<StoredRecord>, StoreError> {
        get_record(&self.pool, identity).await
    }

    async fn list_records(&self, cluster_name: &str) -> Result<Vec<StoredRecord>, StoreError> {
        list_records(&self.pool, cluster_name).await
    }

    async fn count_records(&self) -> Result<i64, StoreError> {
        count_records(&self.pool).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
