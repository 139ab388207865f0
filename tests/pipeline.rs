//! End-to-end pipeline tests over a temporary SQLite database:
//! upsert → index rebuild → search → cache behavior → enrichment.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use marketlore::cache;
use marketlore::config::Config;
use marketlore::db;
use marketlore::extractor::TermDictionary;
use marketlore::index::VectorIndex;
use marketlore::migrate;
use marketlore::models::{
    AssetClass, Category, ConceptEntry, Difficulty, DiscoveryMode, RawDocument, SearchFilters,
    Source, TrustLevel,
};
use marketlore::normalize;
use marketlore::search::KnowledgeSearch;
use marketlore::store;
use marketlore::{contextualize, relations};

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::for_db_path(tmp.path().join("lore.db"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, config, pool)
}

fn entry(term: &str, category: Category, quality: f64, summary: &str) -> ConceptEntry {
    let now = Utc::now().timestamp();
    ConceptEntry {
        id: Uuid::new_v4().to_string(),
        canonical_term: term.to_string(),
        aliases: vec![],
        category,
        difficulty: Difficulty::Intermediate,
        asset_classes: vec![AssetClass::Forex],
        summary: summary.to_string(),
        body: summary.to_string(),
        quality_score: quality,
        relevance_score: quality,
        completeness_score: quality,
        source_ref: format!("hash-{}", term.to_lowercase().replace(' ', "-")),
        source_url: format!("https://example.com/{}", term.to_lowercase().replace(' ', "-")),
        verified: false,
        active: true,
        usage_count: 0,
        created_at: now,
        updated_at: now,
    }
}

async fn build_index(pool: &SqlitePool, config: &Config) -> Arc<VectorIndex> {
    let index = VectorIndex::load_current(pool, &config.embedding).await.unwrap();
    index.rebuild(pool, &config.embedding).await.unwrap();
    Arc::new(index)
}

fn test_source() -> Source {
    Source {
        id: Uuid::new_v4().to_string(),
        name: "testsource".to_string(),
        base_url: "https://example.com".to_string(),
        trust_level: TrustLevel::High,
        discovery_mode: DiscoveryMode::Links,
        feed_url: None,
        max_pages_per_crawl: 10,
        active: true,
    }
}

fn test_dict() -> TermDictionary {
    toml::from_str(
        r#"
        [[term]]
        canonical = "Order Block"
        aliases = ["OB"]
        category = "structure"
        difficulty = "intermediate"
        asset_classes = ["forex"]
        keywords = ["institutional", "supply", "zone", "candle"]

        [[term]]
        canonical = "Fair Value Gap"
        aliases = ["FVG"]
        category = "structure"
        difficulty = "intermediate"
        asset_classes = ["forex"]
        keywords = ["gap", "imbalance", "displacement"]
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn search_ranks_most_similar_entry_first() {
    let (_tmp, config, pool) = setup().await;

    let a = entry(
        "Order Block",
        Category::Structure,
        0.8,
        "An order block is a zone of institutional supply left by a strong candle.",
    );
    let b = entry(
        "Trading Journal",
        Category::Psychology,
        0.8,
        "A trading journal records every trade for later review and discipline.",
    );
    normalize::upsert_entry(&pool, a.clone()).await.unwrap();
    normalize::upsert_entry(&pool, b).await.unwrap();

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let hits = search
        .query(
            "institutional supply zone order block",
            &SearchFilters::default(),
            2,
            false,
        )
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].entry.canonical_term, "Order Block");
    assert!(hits[0].similarity > hits[1].similarity);
}

#[tokio::test]
async fn category_filter_excludes_other_categories() {
    let (_tmp, config, pool) = setup().await;

    let a = entry("Order Block", Category::Structure, 0.8, "institutional zone");
    let b = entry("Drawdown", Category::Risk, 0.8, "equity peak loss");
    normalize::upsert_entry(&pool, a).await.unwrap();
    normalize::upsert_entry(&pool, b).await.unwrap();

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let filters = SearchFilters {
        category: Some(Category::Risk),
        min_quality: Some(0.0),
        ..Default::default()
    };
    let hits = search.query("loss", &filters, 5, false).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.canonical_term, "Drawdown");
}

#[tokio::test]
async fn quality_gate_drops_low_scoring_entries() {
    let (_tmp, config, pool) = setup().await;

    let good = entry("Order Block", Category::Structure, 0.9, "institutional zone theory");
    let weak = entry("Slippage", Category::Execution, 0.2, "institutional zone theory");
    normalize::upsert_entry(&pool, good).await.unwrap();
    normalize::upsert_entry(&pool, weak).await.unwrap();

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let hits = search
        .query("institutional zone theory", &SearchFilters::default(), 5, false)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.canonical_term, "Order Block");
}

#[tokio::test]
async fn expired_cache_rows_are_purged_on_read() {
    let (_tmp, _config, pool) = setup().await;

    let key = cache::cache_key("order block", &SearchFilters::default());
    cache::put(&pool, &key, &["some-id".to_string()], -10)
        .await
        .unwrap();

    assert!(cache::get(&pool, &key).await.unwrap().is_none());

    // The expired row was deleted, not just skipped.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_cache")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    cache::put(&pool, &key, &["some-id".to_string()], 3600)
        .await
        .unwrap();
    assert_eq!(
        cache::get(&pool, &key).await.unwrap().unwrap(),
        vec!["some-id".to_string()]
    );
}

#[tokio::test]
async fn deactivated_entries_vanish_from_cached_results() {
    let (_tmp, config, pool) = setup().await;

    let a = entry("Order Block", Category::Structure, 0.9, "institutional supply zone");
    let a_id = a.id.clone();
    normalize::upsert_entry(&pool, a).await.unwrap();

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let hits = search
        .query("institutional supply", &SearchFilters::default(), 5, false)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Second query hits the cache; the deactivated id must be dropped
    // silently instead of erroring or resurfacing.
    assert!(normalize::set_active(&pool, &a_id, false).await.unwrap());
    let hits = search
        .query("institutional supply", &SearchFilters::default(), 5, false)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn renormalizing_same_document_updates_instead_of_duplicating() {
    let (_tmp, config, pool) = setup().await;
    let dict = test_dict();
    let source = test_source();

    let doc = RawDocument {
        source_id: source.id.clone(),
        url: "https://example.com/order-blocks".to_string(),
        fetched_at: Utc::now(),
        content_hash: "abc123".to_string(),
        text: "An order block is a zone of institutional supply left by a strong candle."
            .to_string(),
        examples: vec![],
    };

    let first = normalize::normalize_document(&pool, &dict, &config.scoring, &source, &doc)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].created);

    let second = normalize::normalize_document(&pool, &dict, &config.scoring, &source, &doc)
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert!(!second[0].created);
    assert_eq!(first[0].entry_id, second[0].entry_id);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM concept_entries")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    // The crawl-side dedup now recognizes this content.
    assert!(store::fingerprint_exists(&pool, "abc123").await.unwrap());
}

#[tokio::test]
async fn one_page_mentioning_two_terms_creates_both_entries() {
    let (_tmp, config, pool) = setup().await;
    let dict = test_dict();
    let source = test_source();

    let doc = RawDocument {
        source_id: source.id.clone(),
        url: "https://example.com/smc-lesson".to_string(),
        fetched_at: Utc::now(),
        content_hash: "smc1".to_string(),
        text: "A fair value gap is part of an order block sequence.".to_string(),
        examples: vec![],
    };

    let outcomes = normalize::normalize_document(&pool, &dict, &config.scoring, &source, &doc)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.created));

    let mut terms: Vec<String> =
        sqlx::query_scalar("SELECT canonical_term FROM concept_entries")
            .fetch_all(&pool)
            .await
            .unwrap();
    terms.sort();
    assert_eq!(terms, vec!["Fair Value Gap", "Order Block"]);

    // Both endpoints exist, so the in-page relationship resolves too.
    let detections = relations::detect(&doc.text, &dict, &config.relations);
    let stored = relations::store_detections(&pool, &detections).await.unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn concurrent_upserts_of_one_term_merge_instead_of_failing() {
    let (_tmp, _config, pool) = setup().await;

    let mut handles = Vec::new();
    for i in 0..24 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let e = entry(
                "Order Block",
                Category::Structure,
                0.5 + i as f64 * 0.01,
                "An order block is a zone of institutional supply.",
            );
            normalize::upsert_entry(&pool, e).await
        }));
    }

    let mut created = 0usize;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.created {
            created += 1;
        }
    }
    // Every racer succeeds; exactly one wins the insert, the rest merge.
    assert_eq!(created, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM concept_entries")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn relation_endpoints_resolve_within_the_detected_category() {
    let (_tmp, config, pool) = setup().await;
    let dict = test_dict();

    // Same canonical term in another category scope, stored first so a
    // category-blind lookup would find it.
    let decoy = entry("Order Block", Category::Execution, 0.9, "decoy scope");
    normalize::upsert_entry(&pool, decoy).await.unwrap();

    let ob = normalize::upsert_entry(
        &pool,
        entry("Order Block", Category::Structure, 0.9, "structure scope"),
    )
    .await
    .unwrap();
    let fvg = normalize::upsert_entry(
        &pool,
        entry("Fair Value Gap", Category::Structure, 0.9, "an imbalance"),
    )
    .await
    .unwrap();

    let detections = relations::detect(
        "A fair value gap is part of an order block sequence.",
        &dict,
        &config.relations,
    );
    assert_eq!(detections.len(), 1);
    let stored = relations::store_detections(&pool, &detections).await.unwrap();
    assert_eq!(stored, 1);

    let (from, to): (String, String) =
        sqlx::query_as("SELECT from_entry, to_entry FROM concept_relationships")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(from, fvg.entry_id);
    assert_eq!(to, ob.entry_id);
}

#[tokio::test]
async fn relationship_edges_surface_in_expanded_search() {
    let (_tmp, config, pool) = setup().await;
    let dict = test_dict();
    let source = test_source();

    for (hash, url, text) in [
        (
            "h1",
            "https://example.com/ob",
            "An order block is a zone of institutional supply.",
        ),
        (
            "h2",
            "https://example.com/fvg",
            "A fair value gap is an imbalance left by displacement.",
        ),
    ] {
        let doc = RawDocument {
            source_id: source.id.clone(),
            url: url.to_string(),
            fetched_at: Utc::now(),
            content_hash: hash.to_string(),
            text: text.to_string(),
            examples: vec![],
        };
        let outcomes = normalize::normalize_document(&pool, &dict, &config.scoring, &source, &doc)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1);
    }

    let detections = relations::detect(
        "A fair value gap is part of an order block sequence.",
        &dict,
        &config.relations,
    );
    assert_eq!(detections.len(), 1);
    let stored = relations::store_detections(&pool, &detections).await.unwrap();
    assert_eq!(stored, 1);

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let filters = SearchFilters {
        min_quality: Some(0.0),
        ..Default::default()
    };
    let hits = search
        .query("fair value gap imbalance displacement", &filters, 1, true)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.canonical_term, "Fair Value Gap");
    assert_eq!(hits[0].related.len(), 1);
    assert_eq!(hits[0].related[0].canonical_term, "Order Block");
}

#[tokio::test]
async fn enrich_with_no_terms_returns_base_unchanged() {
    let (_tmp, config, pool) = setup().await;
    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let (narrative, trace) = contextualize::enrich(&search, &[], "Price swept the lows.")
        .await
        .unwrap();
    assert_eq!(narrative, "Price swept the lows.");
    assert!(trace.is_empty());
}

#[tokio::test]
async fn enrich_appends_cited_clause_and_bumps_usage() {
    let (_tmp, config, pool) = setup().await;

    let a = entry(
        "Order Block",
        Category::Structure,
        0.9,
        "An order block is a zone of institutional supply.",
    );
    let a_id = a.id.clone();
    normalize::upsert_entry(&pool, a).await.unwrap();
    normalize::set_verified(&pool, &a_id, true).await.unwrap();

    // An unverified entry must never be cited.
    let b = entry(
        "Slippage",
        Category::Execution,
        0.9,
        "Slippage is the difference between expected and actual fill price.",
    );
    normalize::upsert_entry(&pool, b).await.unwrap();

    let index = build_index(&pool, &config).await;
    let search = KnowledgeSearch::new(pool.clone(), index, config.clone());

    let terms = vec![
        "order block".to_string(),
        "slippage".to_string(),
        "order block".to_string(),
    ];
    let (narrative, trace) = contextualize::enrich(&search, &terms, "Price tapped the zone.")
        .await
        .unwrap();

    assert!(narrative.starts_with("Price tapped the zone."));
    assert!(narrative.contains("Order Block"));
    assert!(narrative.contains("https://example.com/order-block"));
    assert!(!narrative.contains("Slippage"));

    assert_eq!(trace.len(), 1);
    assert_eq!(trace[0].entry_id, a_id);
    assert_eq!(trace[0].canonical_term, "Order Block");

    let cited = store::entry_by_id(&pool, &a_id).await.unwrap().unwrap();
    assert_eq!(cited.usage_count, 1);
}

#[tokio::test]
async fn rebuild_keeps_exactly_one_current_snapshot() {
    let (_tmp, config, pool) = setup().await;

    let a = entry("Order Block", Category::Structure, 0.9, "institutional supply zone");
    normalize::upsert_entry(&pool, a).await.unwrap();

    let index = VectorIndex::load_current(&pool, &config.embedding)
        .await
        .unwrap();
    let first = index.rebuild(&pool, &config.embedding).await.unwrap();
    let second = index.rebuild(&pool, &config.embedding).await.unwrap();
    assert_ne!(first.version, second.version);
    // Identical content embeds identically.
    assert_eq!(first.checksum, second.checksum);

    let current: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM index_snapshots WHERE current = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(current, 1);

    // Superseded vectors are pruned.
    let stale: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM entry_vectors WHERE snapshot_version != ?",
    )
    .bind(&second.version)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stale, 0);
}

#[tokio::test]
async fn reload_serves_persisted_snapshot() {
    let (_tmp, config, pool) = setup().await;

    let a = entry("Order Block", Category::Structure, 0.9, "institutional supply zone");
    normalize::upsert_entry(&pool, a).await.unwrap();

    let index = VectorIndex::load_current(&pool, &config.embedding)
        .await
        .unwrap();
    let built = index.rebuild(&pool, &config.embedding).await.unwrap();
    drop(index);

    let reloaded = VectorIndex::load_current(&pool, &config.embedding)
        .await
        .unwrap();
    let snapshot = reloaded.snapshot();
    assert_eq!(snapshot.meta.version, built.version);
    assert_eq!(snapshot.len(), 1);
}

#[tokio::test]
async fn for_db_path_config_is_usable() {
    // Guard against test helpers drifting from real defaults.
    let config = Config::for_db_path(PathBuf::from("/tmp/x.db"));
    assert_eq!(config.search.quality_threshold, 0.5);
    assert_eq!(config.embedding.provider, "hashgram");
}
