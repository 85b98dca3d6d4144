// Copyright (C) 2025 The mopsos Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded database migrations.
//!
//! Both backends ship the same `records` schema:
//!
//! | Column | Notes |
//! |--------|-------|
//! | `id` | surrogate key |
//! | `created_at`, `updated_at` | set by the upsert |
//! | `deleted_at` | soft-delete marker, indexed |
//! | `cluster_name`, `instance_id`, `application_name`, `application_instance` | unique together |
//! | `application_version` | overwritten on conflict |
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite::memory:").await?;
//! mopsos::migrations::run_sqlite(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations. Already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

/// Run SQLite migrations. Already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrators_embed_records_schema() {
        for migrator in [&POSTGRES, &SQLITE] {
            let first = migrator.iter().next().expect("at least one migration");
            assert_eq!(first.version, 1);
            assert!(first.sql.contains("CREATE TABLE"));
            assert!(first.sql.contains("records"));
        }
    }

    #[tokio::test]
    async fn test_run_sqlite_is_idempotent() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_sqlite(&pool).await.unwrap();
        run_sqlite(&pool).await.unwrap();

        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }
}
