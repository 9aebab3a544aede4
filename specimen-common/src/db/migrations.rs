//! Database schema migrations
//!
//! Versioned, idempotent upgrades tracked in `schema_version`. Tables are
//! created in their current shape by `init_schema`; migrations only repair
//! databases written by older releases.
//!
//! Never modify an existing migration; add a new one and bump
//! `CURRENT_SCHEMA_VERSION`.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Get current schema version from database
///
/// Returns 0 if schema_version table doesn't exist or has no rows
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='schema_version'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    Ok(())
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Migration v1: two-state file status -> lifecycle status
///
/// Files recorded as `incomplete` were waiting in the upload area, which is
/// what `staged` means now; `complete` files are finished (`cleaned`).
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let staged = sqlx::query("UPDATE stage_file SET status = 'staged' WHERE status = 'incomplete'")
        .execute(pool)
        .await?
        .rows_affected();
    let cleaned = sqlx::query("UPDATE stage_file SET status = 'cleaned' WHERE status = 'complete'")
        .execute(pool)
        .await?
        .rows_affected();

    if staged + cleaned > 0 {
        info!(
            "Migration v1: rewrote legacy file statuses ({} staged, {} cleaned)",
            staged, cleaned
        );
    }
    Ok(())
}

/// Migration v2: add file timestamps to databases created without them
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let now = crate::time::to_db(&crate::time::now());

    for column in ["created_at", "updated_at"] {
        if has_column(pool, "stage_file", column).await? {
            continue;
        }
        let alter = format!(
            "ALTER TABLE stage_file ADD COLUMN {} TEXT NOT NULL DEFAULT ''",
            column
        );
        sqlx::query(&alter).execute(pool).await?;

        let backfill = format!("UPDATE stage_file SET {} = ? WHERE {} = ''", column, column);
        sqlx::query(&backfill).bind(&now).execute(pool).await?;

        info!("Migration v2: added {} to stage_file", column);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn legacy_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        // Shape written by the two-state release
        sqlx::query(
            r#"
            CREATE TABLE stage_file (
                id INTEGER PRIMARY KEY,
                external_id TEXT UNIQUE,
                stage_id INTEGER,
                relative_source_path TEXT UNIQUE,
                relative_target_path TEXT UNIQUE,
                status TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        for (id, status) in [(1, "incomplete"), (2, "complete"), (3, "complete")] {
            sqlx::query(
                "INSERT INTO stage_file (id, stage_id, relative_source_path, relative_target_path, status)
                 VALUES (?, 1, ?, ?, ?)",
            )
            .bind(id)
            .bind(format!("src-{}", id))
            .bind(format!("tgt-{}", id))
            .bind(status)
            .execute(&pool)
            .await
            .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_legacy_database_is_upgraded() {
        let pool = legacy_pool().await;
        crate::db::init::init_schema(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let statuses: Vec<String> = sqlx::query_scalar("SELECT status FROM stage_file ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(statuses, vec!["staged", "cleaned", "cleaned"]);

        assert!(has_column(&pool, "stage_file", "updated_at").await.unwrap());
        let blank: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM stage_file WHERE created_at = '' OR updated_at = ''")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(blank, 0);
        assert_eq!(get_schema_version(&pool).await.unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = legacy_pool().await;
        crate::db::init::init_schema(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(versions, CURRENT_SCHEMA_VERSION as i64);
    }

    #[tokio::test]
    async fn test_schema_version_zero_without_table() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);
    }
}
