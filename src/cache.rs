//! TTL-keyed query result cache.
//!
//! Maps (query text, filter set) to an ordered result-id list. Entries
//! are written once and treated as immutable until expiry: a put replaces
//! the row wholesale, a get never updates one in place. Concurrent
//! writers computing the same key race harmlessly (last write wins; both
//! computed the same deterministic result).

use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::SearchFilters;

/// Stable cache key over the query text and the canonical filter form.
pub fn cache_key(query_text: &str, filters: &SearchFilters) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query_text.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(filters.cache_key_part().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Unexpired result ids for a key, or `None` on miss/expiry.
/// Expired rows are lazily deleted on the way out.
pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<Vec<String>>> {
    let row = sqlx::query("SELECT result_ids, expires_at FROM query_cache WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let expires_at: i64 = row.get("expires_at");
    if expires_at <= Utc::now().timestamp() {
        sqlx::query("DELETE FROM query_cache WHERE key = ?")
            .bind(key)
            .execute(pool)
            .await?;
        return Ok(None);
    }

    let ids_json: String = row.get("result_ids");
    let ids: Vec<String> = serde_json::from_str(&ids_json)?;
    Ok(Some(ids))
}

/// Store a result-id list under a key, replacing any previous entry.
pub async fn put(pool: &SqlitePool, key: &str, ids: &[String], ttl_secs: i64) -> Result<()> {
    let now = Utc::now().timestamp();
    let ids_json = serde_json::to_string(ids)?;

    sqlx::query(
        r#"
        INSERT INTO query_cache (key, result_ids, created_at, expires_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET
            result_ids = excluded.result_ids,
            created_at = excluded.created_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(key)
    .bind(ids_json)
    .bind(now)
    .bind(now + ttl_secs)
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop all expired rows. Housekeeping only; correctness never depends
/// on it because `get` checks expiry itself.
pub async fn purge_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM query_cache WHERE expires_at <= ?")
        .bind(Utc::now().timestamp())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
