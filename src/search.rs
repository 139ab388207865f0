//! Public knowledge read path: cache → index → filters → expansion.
//!
//! A query is embedded once, checked against the TTL cache, and only on a
//! miss run against the vector index with over-fetch to survive
//! filtering. Filters apply in a fixed order (active → category → asset
//! class → quality threshold → verified) and results are ordered by
//! similarity descending, with ties broken by quality then id so equal
//! inputs always produce equal output. Stale cached ids (entries since
//! deactivated or deleted) are dropped silently, never surfaced as
//! errors.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cache;
use crate::config::Config;
use crate::db;
use crate::embedding::{self, cosine_similarity};
use crate::index::VectorIndex;
use crate::models::{ConceptEntry, SearchFilters, SearchHit};
use crate::relations;
use crate::store;

pub struct KnowledgeSearch {
    pool: SqlitePool,
    index: Arc<VectorIndex>,
    config: Config,
}

impl KnowledgeSearch {
    pub fn new(pool: SqlitePool, index: Arc<VectorIndex>, config: Config) -> Self {
        KnowledgeSearch {
            pool,
            index,
            config,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ranked concept entries for a query, at most `k`.
    ///
    /// With `expand_related`, each hit also carries its highest-weight
    /// outgoing relationship edges (up to the configured maximum).
    pub async fn query(
        &self,
        text: &str,
        filters: &SearchFilters,
        k: usize,
        expand_related: bool,
    ) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embedding::embed_query(&self.config.embedding, text).await?;

        // One capture per call; the snapshot cannot change under us.
        let snapshot = self.index.snapshot();
        if snapshot.meta.vector_dimension != query_vec.len() as i64 {
            bail!(
                "Query embedding has {} dims but the index snapshot has {}. \
                 Run `lore rebuild-index`.",
                query_vec.len(),
                snapshot.meta.vector_dimension
            );
        }

        let key = cache::cache_key(text, filters);

        let ordered_entries: Vec<(ConceptEntry, f64)> = match cache::get(&self.pool, &key).await? {
            Some(ids) => {
                // Hit: resolve against the current entry set, silently
                // dropping ids that vanished or went inactive.
                let entries = store::resolve_active_entries(&self.pool, &ids).await?;
                entries
                    .into_iter()
                    .map(|e| {
                        let sim = snapshot
                            .vector(&e.id)
                            .map(|v| cosine_similarity(&query_vec, v) as f64)
                            .unwrap_or(0.0);
                        (e, sim)
                    })
                    .collect()
            }
            None => {
                let k_raw = (k * 4).max(self.config.search.candidate_floor);
                let candidates = snapshot.search(&query_vec, k_raw);

                let ids: Vec<String> = candidates.iter().map(|(id, _)| id.clone()).collect();
                let sim_by_id: HashMap<&str, f64> = candidates
                    .iter()
                    .map(|(id, sim)| (id.as_str(), *sim))
                    .collect();

                let entries = store::resolve_active_entries(&self.pool, &ids).await?;
                let mut filtered = apply_filters(entries, filters, &self.config);

                filtered.sort_by(|a, b| {
                    let sa = sim_by_id.get(a.id.as_str()).copied().unwrap_or(0.0);
                    let sb = sim_by_id.get(b.id.as_str()).copied().unwrap_or(0.0);
                    sb.partial_cmp(&sa)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            b.quality_score
                                .partial_cmp(&a.quality_score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.id.cmp(&b.id))
                });
                filtered.truncate(k);

                let result_ids: Vec<String> = filtered.iter().map(|e| e.id.clone()).collect();
                cache::put(
                    &self.pool,
                    &key,
                    &result_ids,
                    self.config.search.cache_ttl_secs,
                )
                .await?;

                filtered
                    .into_iter()
                    .map(|e| {
                        let sim = sim_by_id.get(e.id.as_str()).copied().unwrap_or(0.0);
                        (e, sim)
                    })
                    .collect()
            }
        };

        let mut hits = Vec::with_capacity(ordered_entries.len());
        for (entry, similarity) in ordered_entries.into_iter().take(k) {
            let related = if expand_related {
                relations::outgoing_edges(&self.pool, &entry.id, self.config.search.max_related)
                    .await?
            } else {
                Vec::new()
            };
            hits.push(SearchHit {
                entry,
                similarity,
                related,
            });
        }

        Ok(hits)
    }
}

/// The fixed filter pipeline. Order matters and is part of the contract:
/// active → category → asset class → quality threshold → verified.
fn apply_filters(
    entries: Vec<ConceptEntry>,
    filters: &SearchFilters,
    config: &Config,
) -> Vec<ConceptEntry> {
    let threshold = filters
        .min_quality
        .unwrap_or(config.search.quality_threshold);

    entries
        .into_iter()
        .filter(|e| e.active)
        .filter(|e| filters.category.map(|c| e.category == c).unwrap_or(true))
        .filter(|e| {
            filters
                .asset_class
                .map(|a| e.asset_classes.contains(&a))
                .unwrap_or(true)
        })
        .filter(|e| e.quality_score >= threshold)
        .filter(|e| !filters.high_quality_only || e.verified)
        .collect()
}

/// CLI entry point: run a search and print ranked results.
pub async fn run_search(
    config: &Config,
    query: &str,
    k: usize,
    filters: &SearchFilters,
    expand_related: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let index = Arc::new(VectorIndex::load_current(&pool, &config.embedding).await?);
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let hits = search.query(query, filters, k, expand_related).await?;

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let e = &hit.entry;
        println!(
            "{}. [{:.3}] {} ({}/{})",
            i + 1,
            hit.similarity,
            e.canonical_term,
            e.category.as_str(),
            e.difficulty.as_str()
        );
        println!(
            "    quality: {:.2}  verified: {}  source: {}",
            e.quality_score, e.verified, e.source_url
        );
        println!("    summary: {}", truncate(&e.summary, 160));
        for rel in &hit.related {
            println!(
                "    related: {} ({}, {:.2})",
                rel.canonical_term,
                rel.relation_type.as_str(),
                rel.weight
            );
        }
        println!("    id: {}", e.id);
        println!();
    }

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Difficulty};

    fn entry(id: &str, category: Category, quality: f64, verified: bool) -> ConceptEntry {
        ConceptEntry {
            id: id.to_string(),
            canonical_term: format!("term-{}", id),
            aliases: vec![],
            category,
            difficulty: Difficulty::Beginner,
            asset_classes: vec![crate::models::AssetClass::Forex],
            summary: "s".to_string(),
            body: "b".to_string(),
            quality_score: quality,
            relevance_score: 0.5,
            completeness_score: 0.5,
            source_ref: "h".to_string(),
            source_url: "u".to_string(),
            verified,
            active: true,
            usage_count: 0,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn test_config() -> Config {
        Config::for_db_path(std::path::PathBuf::from("/tmp/unused.db"))
    }

    #[test]
    fn filters_by_category() {
        let entries = vec![
            entry("a", Category::Structure, 0.9, true),
            entry("b", Category::Risk, 0.9, true),
        ];
        let filters = SearchFilters {
            category: Some(Category::Structure),
            ..Default::default()
        };
        let out = apply_filters(entries, &filters, &test_config());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn quality_threshold_applies_by_default() {
        let entries = vec![
            entry("a", Category::Structure, 0.4, true),
            entry("b", Category::Structure, 0.6, true),
        ];
        let out = apply_filters(entries, &SearchFilters::default(), &test_config());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }

    #[test]
    fn min_quality_override_relaxes_threshold() {
        let entries = vec![entry("a", Category::Structure, 0.4, true)];
        let filters = SearchFilters {
            min_quality: Some(0.1),
            ..Default::default()
        };
        let out = apply_filters(entries, &filters, &test_config());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn high_quality_only_requires_verified() {
        let entries = vec![
            entry("a", Category::Structure, 0.9, false),
            entry("b", Category::Structure, 0.9, true),
        ];
        let filters = SearchFilters {
            high_quality_only: true,
            ..Default::default()
        };
        let out = apply_filters(entries, &filters, &test_config());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }

    #[test]
    fn inactive_entries_always_dropped() {
        let mut inactive = entry("a", Category::Structure, 0.9, true);
        inactive.active = false;
        let out = apply_filters(vec![inactive], &SearchFilters::default(), &test_config());
        assert!(out.is_empty());
    }

    #[test]
    fn asset_class_filter_applies() {
        let mut other = entry("a", Category::Structure, 0.9, true);
        other.asset_classes = vec![crate::models::AssetClass::Crypto];
        let keep = entry("b", Category::Structure, 0.9, true);
        let filters = SearchFilters {
            asset_class: Some(crate::models::AssetClass::Forex),
            ..Default::default()
        };
        let out = apply_filters(vec![other, keep], &filters, &test_config());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "b");
    }
}
