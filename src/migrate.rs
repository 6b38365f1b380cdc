use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            fingerprint TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            artist TEXT,
            album TEXT,
            duration_secs INTEGER,
            license_raw TEXT,
            license_kind TEXT NOT NULL DEFAULT 'unknown',
            source_url TEXT NOT NULL,
            media_url TEXT,
            collected_by TEXT NOT NULL,
            category TEXT,
            secondary_categories TEXT NOT NULL DEFAULT '[]',
            mood_tags TEXT NOT NULL DEFAULT '[]',
            cultural_context TEXT,
            status TEXT NOT NULL,
            lease_owner TEXT,
            lease_acquired_at INTEGER,
            lease_expires_at INTEGER,
            not_before INTEGER,
            attempts TEXT NOT NULL DEFAULT '{}',
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_vectors (
            item_id TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (item_id) REFERENCES items(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Claim selection scans by status, oldest first
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_status_updated ON items(status, updated_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_source ON items(source, source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_lease_expiry ON items(lease_expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
