//! Core data models used throughout Marketlore.
//!
//! These types represent the sources, raw documents, concept entries, and
//! relationship edges that flow through the crawl → normalize → index →
//! search pipeline. Durable types round-trip through SQLite as plain
//! strings/integers; enums carry explicit `as_str`/`parse` conversions so
//! the schema never depends on serde representation details.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordinal reliability rating of a source. Feeds `quality_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
    Authoritative,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Low => "low",
            TrustLevel::Medium => "medium",
            TrustLevel::High => "high",
            TrustLevel::Authoritative => "authoritative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TrustLevel::Low),
            "medium" => Some(TrustLevel::Medium),
            "high" => Some(TrustLevel::High),
            "authoritative" => Some(TrustLevel::Authoritative),
            _ => None,
        }
    }

    /// Contribution of source trust to the quality formula, in [0, 1].
    /// Monotonic in the ordering of the variants.
    pub fn weight(&self) -> f64 {
        match self {
            TrustLevel::Low => 0.25,
            TrustLevel::Medium => 0.5,
            TrustLevel::High => 0.75,
            TrustLevel::Authoritative => 1.0,
        }
    }
}

/// How candidate URLs are discovered for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    Sitemap,
    Rss,
    Links,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMode::Sitemap => "sitemap",
            DiscoveryMode::Rss => "rss",
            DiscoveryMode::Links => "links",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sitemap" => Some(DiscoveryMode::Sitemap),
            "rss" => Some(DiscoveryMode::Rss),
            "links" => Some(DiscoveryMode::Links),
            _ => None,
        }
    }
}

/// A curated crawl target. Created by `init-sources`, read by the crawler.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub trust_level: TrustLevel,
    pub discovery_mode: DiscoveryMode,
    /// Explicit sitemap/RSS URL; defaults to `<base_url>/sitemap.xml` or
    /// `<base_url>/feed` when absent.
    pub feed_url: Option<String>,
    pub max_pages_per_crawl: i64,
    pub active: bool,
}

/// Ephemeral crawl output. Never persisted beyond the crawl that produced it.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_id: String,
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    /// Stable sha256 of the normalized text, used for re-crawl dedup.
    pub content_hash: String,
    pub text: String,
    pub examples: Vec<String>,
}

/// Domain category of a concept entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Structure,
    Indicator,
    Risk,
    Psychology,
    Strategy,
    Execution,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Structure => "structure",
            Category::Indicator => "indicator",
            Category::Risk => "risk",
            Category::Psychology => "psychology",
            Category::Strategy => "strategy",
            Category::Execution => "execution",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "structure" => Some(Category::Structure),
            "indicator" => Some(Category::Indicator),
            "risk" => Some(Category::Risk),
            "psychology" => Some(Category::Psychology),
            "strategy" => Some(Category::Strategy),
            "execution" => Some(Category::Execution),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
            Difficulty::Expert => "expert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            "expert" => Some(Difficulty::Expert),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Forex,
    Crypto,
    Equities,
    Futures,
    Commodities,
    Indices,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Forex => "forex",
            AssetClass::Crypto => "crypto",
            AssetClass::Equities => "equities",
            AssetClass::Futures => "futures",
            AssetClass::Commodities => "commodities",
            AssetClass::Indices => "indices",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "forex" => Some(AssetClass::Forex),
            "crypto" => Some(AssetClass::Crypto),
            "equities" => Some(AssetClass::Equities),
            "futures" => Some(AssetClass::Futures),
            "commodities" => Some(AssetClass::Commodities),
            "indices" => Some(AssetClass::Indices),
            _ => None,
        }
    }
}

/// A normalized, scored knowledge entry keyed by (canonical_term, category).
#[derive(Debug, Clone)]
pub struct ConceptEntry {
    pub id: String,
    pub canonical_term: String,
    pub aliases: Vec<String>,
    pub category: Category,
    pub difficulty: Difficulty,
    pub asset_classes: Vec<AssetClass>,
    pub summary: String,
    pub body: String,
    pub quality_score: f64,
    pub relevance_score: f64,
    pub completeness_score: f64,
    /// Content fingerprint of the document this entry was normalized from.
    pub source_ref: String,
    /// Human-readable origin (source name + URL) for citations.
    pub source_url: String,
    pub verified: bool,
    pub active: bool,
    pub usage_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Typed, directed edge between two concept entries.
#[derive(Debug, Clone)]
pub struct ConceptRelationship {
    pub from_entry: String,
    pub to_entry: String,
    pub relation_type: RelationType,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    PartOf,
    Causes,
    Precedes,
    ContrastsWith,
    Requires,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::PartOf => "part_of",
            RelationType::Causes => "causes",
            RelationType::Precedes => "precedes",
            RelationType::ContrastsWith => "contrasts_with",
            RelationType::Requires => "requires",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "part_of" => Some(RelationType::PartOf),
            "causes" => Some(RelationType::Causes),
            "precedes" => Some(RelationType::Precedes),
            "contrasts_with" => Some(RelationType::ContrastsWith),
            "requires" => Some(RelationType::Requires),
            _ => None,
        }
    }
}

/// Append-only audit record of one crawl invocation.
#[derive(Debug, Clone)]
pub struct CrawlLog {
    pub id: String,
    pub source_id: String,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub pages_fetched: i64,
    pub entries_created: i64,
    pub entries_updated: i64,
    pub errors: Vec<String>,
}

impl CrawlLog {
    pub fn begin(source_id: &str) -> Self {
        CrawlLog {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            started_at: Utc::now().timestamp(),
            finished_at: None,
            pages_fetched: 0,
            entries_created: 0,
            entries_updated: 0,
            errors: Vec::new(),
        }
    }
}

/// Metadata describing one fully built vector index version.
#[derive(Debug, Clone)]
pub struct IndexSnapshotMeta {
    pub version: String,
    pub entry_count: i64,
    pub vector_dimension: i64,
    pub model: String,
    pub checksum: String,
    pub built_at: i64,
}

/// Post-filters applied to knowledge search results, in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub category: Option<Category>,
    pub asset_class: Option<AssetClass>,
    /// Overrides the configured quality threshold when set.
    pub min_quality: Option<f64>,
    /// Additionally require `verified = true`.
    pub high_quality_only: bool,
}

impl SearchFilters {
    /// Canonical string form for cache keying. Field order is fixed; two
    /// filter sets with equal semantics always produce the same key part.
    pub fn cache_key_part(&self) -> String {
        format!(
            "cat={};asset={};minq={};hq={}",
            self.category.map(|c| c.as_str()).unwrap_or("-"),
            self.asset_class.map(|a| a.as_str()).unwrap_or("-"),
            self.min_quality
                .map(|q| format!("{:.4}", q))
                .unwrap_or_else(|| "-".to_string()),
            self.high_quality_only
        )
    }
}

/// A ranked search result with its similarity score and optional
/// relationship expansion.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entry: ConceptEntry,
    pub similarity: f64,
    pub related: Vec<RelatedConcept>,
}

/// A related concept surfaced by relationship expansion.
#[derive(Debug, Clone)]
pub struct RelatedConcept {
    pub entry_id: String,
    pub canonical_term: String,
    pub relation_type: RelationType,
    pub weight: f64,
}

/// One element of the provenance trace returned by the contextualizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceEntry {
    pub entry_id: String,
    pub canonical_term: String,
    pub source_ref: String,
}
