//! Source catalog loading and the `init-sources` / `sources` commands.
//!
//! The catalog is a TOML file of `[[source]]` entries maintained by hand.
//! `init-sources` upserts it into the database keyed by name, so edits to
//! trust level or discovery mode take effect on re-run without losing the
//! stable source ids that crawl logs reference. A missing or corrupt
//! catalog is fatal.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::models::{DiscoveryMode, TrustLevel};
use crate::store;

#[derive(Debug, Deserialize)]
pub struct SourceCatalog {
    #[serde(rename = "source")]
    pub sources: Vec<SourceDef>,
}

#[derive(Debug, Deserialize)]
pub struct SourceDef {
    pub name: String,
    pub base_url: String,
    pub trust_level: TrustLevel,
    pub discovery_mode: DiscoveryMode,
    #[serde(default)]
    pub feed_url: Option<String>,
    #[serde(default)]
    pub max_pages_per_crawl: Option<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

pub fn load_catalog(path: &Path) -> Result<SourceCatalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source catalog: {}", path.display()))?;
    let catalog: SourceCatalog = toml::from_str(&content)
        .with_context(|| format!("Failed to parse source catalog: {}", path.display()))?;

    if catalog.sources.is_empty() {
        bail!("Source catalog {} defines no sources", path.display());
    }
    for def in &catalog.sources {
        if def.name.trim().is_empty() {
            bail!("Source catalog entry with empty name");
        }
        url::Url::parse(&def.base_url)
            .with_context(|| format!("Source '{}' has an invalid base_url", def.name))?;
    }
    Ok(catalog)
}

/// Upsert one catalog entry by name. Returns true when a new row was
/// inserted rather than an existing one updated.
pub async fn upsert_source(pool: &SqlitePool, def: &SourceDef) -> Result<bool> {
    let max_pages = def.max_pages_per_crawl.unwrap_or(0);

    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM sources WHERE name = ?")
        .bind(&def.name)
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE sources
                SET base_url = ?, trust_level = ?, discovery_mode = ?,
                    feed_url = ?, max_pages_per_crawl = ?, active = ?
                WHERE id = ?
                "#,
            )
            .bind(&def.base_url)
            .bind(def.trust_level.as_str())
            .bind(def.discovery_mode.as_str())
            .bind(&def.feed_url)
            .bind(max_pages)
            .bind(def.active as i64)
            .bind(&id)
            .execute(pool)
            .await?;
            Ok(false)
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO sources
                (id, name, base_url, trust_level, discovery_mode, feed_url, max_pages_per_crawl, active)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&def.name)
            .bind(&def.base_url)
            .bind(def.trust_level.as_str())
            .bind(def.discovery_mode.as_str())
            .bind(&def.feed_url)
            .bind(max_pages)
            .bind(def.active as i64)
            .execute(pool)
            .await?;
            Ok(true)
        }
    }
}

/// CLI entry point for `init-sources`.
pub async fn run_init_sources(config: &Config) -> Result<()> {
    let catalog = load_catalog(&config.catalog.sources_path)?;
    let pool = db::connect(config).await?;

    let mut created = 0usize;
    let mut updated = 0usize;
    for def in &catalog.sources {
        if upsert_source(&pool, def).await? {
            created += 1;
        } else {
            updated += 1;
        }
    }

    println!(
        "Source catalog synced: {} created, {} updated.",
        created, updated
    );
    pool.close().await;
    Ok(())
}

/// CLI entry point for `sources`: list the catalog with last-crawl stats.
pub async fn run_list_sources(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let sources = store::active_sources(&pool).await?;

    if sources.is_empty() {
        println!("No active sources. Run `lore init-sources` first.");
        pool.close().await;
        return Ok(());
    }

    for source in &sources {
        println!(
            "{} [{}] {} ({})",
            source.name,
            source.trust_level.as_str(),
            source.base_url,
            source.discovery_mode.as_str()
        );

        let last = sqlx::query(
            "SELECT finished_at, pages_fetched, entries_created, entries_updated
             FROM crawl_logs WHERE source_id = ? ORDER BY started_at DESC LIMIT 1",
        )
        .bind(&source.id)
        .fetch_optional(&pool)
        .await?;

        match last {
            Some(row) => {
                let finished: Option<i64> = row.get("finished_at");
                let when = finished
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "interrupted".to_string());
                println!(
                    "    last crawl: {} ({} pages, {} created, {} updated)",
                    when,
                    row.get::<i64, _>("pages_fetched"),
                    row.get::<i64, _>("entries_created"),
                    row.get::<i64, _>("entries_updated")
                );
            }
            None => println!("    last crawl: never"),
        }
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_parses_full_entry() {
        let toml_str = r#"
            [[source]]
            name = "babypips"
            base_url = "https://www.babypips.com"
            trust_level = "high"
            discovery_mode = "sitemap"
            feed_url = "https://www.babypips.com/sitemap.xml"
            max_pages_per_crawl = 40

            [[source]]
            name = "blog"
            base_url = "https://example.com"
            trust_level = "low"
            discovery_mode = "links"
            active = false
        "#;
        let catalog: SourceCatalog = toml::from_str(toml_str).unwrap();
        assert_eq!(catalog.sources.len(), 2);
        assert_eq!(catalog.sources[0].trust_level, TrustLevel::High);
        assert_eq!(catalog.sources[0].max_pages_per_crawl, Some(40));
        assert!(catalog.sources[0].active);
        assert!(!catalog.sources[1].active);
        assert_eq!(catalog.sources[1].discovery_mode, DiscoveryMode::Links);
    }

    #[test]
    fn load_rejects_bad_base_url() {
        let tmp = std::env::temp_dir().join("lore-bad-sources-test.toml");
        std::fs::write(
            &tmp,
            r#"
            [[source]]
            name = "broken"
            base_url = "not a url"
            trust_level = "low"
            discovery_mode = "links"
            "#,
        )
        .unwrap();
        let err = load_catalog(&tmp).unwrap_err();
        assert!(err.to_string().contains("base_url"));
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = load_catalog(Path::new("/nonexistent/sources.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
