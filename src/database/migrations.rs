//! # Database Migration System
//!
//! Schema migrations embedded at compile time and applied in version order,
//! tracked in `taskrelay_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several service instances may boot against the same database at once. The
//! migration run holds a PostgreSQL advisory lock for its whole duration, so
//! exactly one instance applies outstanding migrations while the others wait
//! and then find nothing left to do:
//!
//! ```sql
//! SELECT pg_advisory_lock(7305206281147359232)
//! ```

use sqlx::PgPool;
use std::collections::HashSet;
use tracing::info;

/// Represents a single embedded migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: &'static str,
    /// Human-readable migration name
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20250101000000",
        name: "create taskrelay tasks",
        sql: include_str!("../../migrations/20250101000000_create_taskrelay_tasks.sql"),
    },
    Migration {
        version: "20250102000000",
        name: "relax parent index, add status index",
        sql: include_str!("../../migrations/20250102000000_relax_parent_index_add_status_index.sql"),
    },
];

const MIGRATION_LOCK_KEY: i64 = 7_305_206_281_147_359_232;

/// Manages database schema migrations with concurrency safety.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all outstanding migrations in order
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding_migrations(pool).await;

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        Self::ensure_migration_table(pool).await?;
        let applied = Self::get_applied_migrations(pool).await?;

        for migration in MIGRATIONS {
            if applied.contains(migration.version) {
                continue;
            }
            info!(version = migration.version, name = migration.name, "Applying migration");

            let mut tx = pool.begin().await?;
            sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO taskrelay_schema_migrations (version) VALUES ($1)")
                .bind(migration.version)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        Ok(())
    }

    /// Ensure migration tracking table exists
    async fn ensure_migration_table(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS taskrelay_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get list of applied migration versions
    async fn get_applied_migrations(pool: &PgPool) -> Result<HashSet<String>, sqlx::Error> {
        let versions: Vec<String> =
            sqlx::query_scalar("SELECT version FROM taskrelay_schema_migrations")
                .fetch_all(pool)
                .await?;
        Ok(versions.into_iter().collect())
    }
}
