//! Shared SQLite row mapping and entry queries.
//!
//! The normalizer, index, search, and contextualizer all read concept
//! entries; the row ↔ struct translation lives here so enum string forms
//! are decoded in exactly one place.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{AssetClass, Category, ConceptEntry, Difficulty, Source};

pub const ENTRY_COLUMNS: &str = "id, canonical_term, aliases, category, difficulty, asset_classes, \
     summary, body, quality_score, relevance_score, completeness_score, \
     source_ref, source_url, verified, active, usage_count, created_at, updated_at";

pub fn entry_from_row(row: &SqliteRow) -> Result<ConceptEntry> {
    let category_str: String = row.get("category");
    let difficulty_str: String = row.get("difficulty");
    let aliases_json: String = row.get("aliases");
    let assets_json: String = row.get("asset_classes");

    let aliases: Vec<String> = serde_json::from_str(&aliases_json)?;
    let asset_strs: Vec<String> = serde_json::from_str(&assets_json)?;
    let asset_classes = asset_strs
        .iter()
        .filter_map(|s| AssetClass::parse(s))
        .collect();

    Ok(ConceptEntry {
        id: row.get("id"),
        canonical_term: row.get("canonical_term"),
        aliases,
        category: Category::parse(&category_str)
            .ok_or_else(|| anyhow!("Unknown category in DB: {}", category_str))?,
        difficulty: Difficulty::parse(&difficulty_str)
            .ok_or_else(|| anyhow!("Unknown difficulty in DB: {}", difficulty_str))?,
        asset_classes,
        summary: row.get("summary"),
        body: row.get("body"),
        quality_score: row.get("quality_score"),
        relevance_score: row.get("relevance_score"),
        completeness_score: row.get("completeness_score"),
        source_ref: row.get("source_ref"),
        source_url: row.get("source_url"),
        verified: row.get::<i64, _>("verified") != 0,
        active: row.get::<i64, _>("active") != 0,
        usage_count: row.get("usage_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let trust_str: String = row.get("trust_level");
    let mode_str: String = row.get("discovery_mode");

    Ok(Source {
        id: row.get("id"),
        name: row.get("name"),
        base_url: row.get("base_url"),
        trust_level: crate::models::TrustLevel::parse(&trust_str)
            .ok_or_else(|| anyhow!("Unknown trust level in DB: {}", trust_str))?,
        discovery_mode: crate::models::DiscoveryMode::parse(&mode_str)
            .ok_or_else(|| anyhow!("Unknown discovery mode in DB: {}", mode_str))?,
        feed_url: row.get("feed_url"),
        max_pages_per_crawl: row.get("max_pages_per_crawl"),
        active: row.get::<i64, _>("active") != 0,
    })
}

pub async fn entry_by_id(pool: &SqlitePool, id: &str) -> Result<Option<ConceptEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM concept_entries WHERE id = ?",
        ENTRY_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Resolve ids against the current entry set, preserving input order and
/// silently dropping ids that no longer exist or are inactive.
pub async fn resolve_active_entries(pool: &SqlitePool, ids: &[String]) -> Result<Vec<ConceptEntry>> {
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = entry_by_id(pool, id).await? {
            if entry.active {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

/// All active entries, ordered by id for deterministic iteration.
pub async fn active_entries(pool: &SqlitePool) -> Result<Vec<ConceptEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM concept_entries WHERE active = 1 ORDER BY id",
        ENTRY_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

/// Whether a crawl fingerprint is already represented in the entry store.
pub async fn fingerprint_exists(pool: &SqlitePool, content_hash: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM concept_entries WHERE source_ref = ?")
            .bind(content_hash)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

pub async fn source_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Source>> {
    let row = sqlx::query("SELECT * FROM sources WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(source_from_row).transpose()
}

pub async fn active_sources(pool: &SqlitePool) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources WHERE active = 1 ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(source_from_row).collect()
}

pub fn aliases_to_json(aliases: &[String]) -> String {
    serde_json::to_string(aliases).unwrap_or_else(|_| "[]".to_string())
}

pub fn assets_to_json(assets: &[AssetClass]) -> String {
    let strs: Vec<&str> = assets.iter().map(|a| a.as_str()).collect();
    serde_json::to_string(&strs).unwrap_or_else(|_| "[]".to_string())
}
