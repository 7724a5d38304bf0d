//! Database initialization
//!
//! Opens (creating on first run) the SQLite lookup cache and brings its
//! schema up to date. Every statement is idempotent, so opening an existing
//! cache is the same code path as creating a new one.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// How long a connection waits on a locked database before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Current cache schema version
///
/// Increment when the `lookup_cache` layout changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Applied to every pooled connection; WAL lets readers proceed while a
    // worker writes
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new cache database: {}", db_path.display());
    } else {
        info!("Opened existing cache database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_lookup_cache_table(&pool).await?;
    record_schema_version(&pool).await?;

    Ok(pool)
}

/// Create the schema_version table
pub async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
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

/// Create the lookup_cache table
///
/// One row per (kind, cache_key). `payload` is the JSON encoding of the
/// cached value; `fetched_at` and `expires_at` are Unix milliseconds. The
/// expiry index keeps sweeps a range delete instead of a full scan.
pub async fn create_lookup_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lookup_cache (
            kind TEXT NOT NULL,
            cache_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (kind, cache_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_lookup_cache_expires_at ON lookup_cache(expires_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Get current schema version (0 when never recorded)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn record_schema_version(pool: &SqlitePool) -> Result<()> {
    let current = get_schema_version(pool).await?;

    if current == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current > CURRENT_SCHEMA_VERSION {
        warn!(
            "Cache schema version ({}) is newer than code version ({})",
            current, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!(
        "Cache schema upgraded: v{} -> v{}",
        current, CURRENT_SCHEMA_VERSION
    );
    Ok(())
}
