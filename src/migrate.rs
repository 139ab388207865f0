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

/// Idempotent schema creation; safe to run on every startup.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            base_url TEXT NOT NULL,
            trust_level TEXT NOT NULL,
            discovery_mode TEXT NOT NULL,
            feed_url TEXT,
            max_pages_per_crawl INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS concept_entries (
            id TEXT PRIMARY KEY,
            canonical_term TEXT NOT NULL,
            aliases TEXT NOT NULL DEFAULT '[]',
            category TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            asset_classes TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL,
            body TEXT NOT NULL,
            quality_score REAL NOT NULL,
            relevance_score REAL NOT NULL,
            completeness_score REAL NOT NULL,
            source_ref TEXT NOT NULL,
            source_url TEXT NOT NULL DEFAULT '',
            verified INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            usage_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(canonical_term, category)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS concept_relationships (
            from_entry TEXT NOT NULL,
            to_entry TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            weight REAL NOT NULL,
            PRIMARY KEY (from_entry, to_entry, relation_type),
            FOREIGN KEY (from_entry) REFERENCES concept_entries(id),
            FOREIGN KEY (to_entry) REFERENCES concept_entries(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_logs (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            pages_fetched INTEGER NOT NULL DEFAULT 0,
            entries_created INTEGER NOT NULL DEFAULT 0,
            entries_updated INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_snapshots (
            version TEXT PRIMARY KEY,
            entry_count INTEGER NOT NULL,
            vector_dimension INTEGER NOT NULL,
            model TEXT NOT NULL,
            checksum TEXT NOT NULL,
            built_at INTEGER NOT NULL,
            current INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_vectors (
            snapshot_version TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            PRIMARY KEY (snapshot_version, entry_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_cache (
            key TEXT PRIMARY KEY,
            result_ids TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_source_ref ON concept_entries(source_ref)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_category ON concept_entries(category)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relationships_from ON concept_relationships(from_entry)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crawl_logs_source ON crawl_logs(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}
