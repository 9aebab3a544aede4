//! Database initialization
//!
//! Opens (creating on first run) the SQLite database that is the single
//! source of truth for projects, samples, methods, stages, files and users,
//! then brings the schema up to date.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets the sweepers read while a request appends; every connection
    // gets the same pragmas through the connect options.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Private in-memory database with the full schema
///
/// Limited to one connection: every SQLite connection to `:memory:` is a
/// separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;

    Ok(pool)
}

/// Create every table (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_project_table(pool).await?;
    create_sample_table(pool).await?;
    create_method_table(pool).await?;
    create_stage_table(pool).await?;
    create_stage_file_table(pool).await?;
    create_user_tables(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// AUTOINCREMENT keeps SQLite from handing out a deleted row's id again, so
// an external id can never come back naming a different record.

async fn create_project_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            name TEXT NOT NULL UNIQUE,
            sample_mask TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sample_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sample (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            project_id INTEGER NOT NULL REFERENCES project(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (project_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_method_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS method (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_stage_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            sample_id INTEGER NOT NULL REFERENCES sample(id),
            method_id INTEGER NOT NULL REFERENCES method(id),
            annotation TEXT NOT NULL DEFAULT '',
            alt_id INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The sequencer reads the tail of one sample's log on every append
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stage_sample ON stage(sample_id, id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_stage_file_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stage_file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            stage_id INTEGER NOT NULL REFERENCES stage(id),
            relative_source_path TEXT NOT NULL UNIQUE,
            relative_target_path TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL
                CHECK (status IN ('prepared', 'staged', 'archived', 'cleaned')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sweepers poll by status
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stage_file_status ON stage_file(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_user_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_authorization (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            status TEXT NOT NULL,
            authorized INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_authentication (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id TEXT UNIQUE,
            user_id INTEGER NOT NULL REFERENCES user_authorization(id),
            authenticator TEXT NOT NULL,
            external_uid TEXT NOT NULL,
            UNIQUE (authenticator, external_uid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
