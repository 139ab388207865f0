use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-page fetch timeout.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Minimum interval between requests to the same domain.
    #[serde(default = "default_min_interval_ms")]
    pub min_request_interval_ms: u64,
    /// How long a fetched robots.txt policy stays valid.
    #[serde(default = "default_robots_ttl_hours")]
    pub robots_ttl_hours: u64,
    #[serde(default = "default_max_pages")]
    pub default_max_pages: i64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            user_agent: default_user_agent(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            min_request_interval_ms: default_min_interval_ms(),
            robots_ttl_hours: default_robots_ttl_hours(),
            default_max_pages: default_max_pages(),
        }
    }
}

fn default_user_agent() -> String {
    "marketlore-crawler/0.3 (+https://github.com/marketlore/marketlore)".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    20
}
fn default_min_interval_ms() -> u64 {
    1500
}
fn default_robots_ttl_hours() -> u64 {
    24
}
fn default_max_pages() -> i64 {
    50
}

/// Weights for the completeness components. The quality formula itself
/// (0.5 relevance + 0.3 completeness + 0.2 trust) is fixed, not configured.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_definition_weight")]
    pub definition_weight: f64,
    #[serde(default = "default_example_weight")]
    pub example_weight: f64,
    #[serde(default = "default_length_weight")]
    pub length_weight: f64,
    /// Minimum body length (chars) counted as non-trivial.
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            definition_weight: default_definition_weight(),
            example_weight: default_example_weight(),
            length_weight: default_length_weight(),
            min_body_chars: default_min_body_chars(),
        }
    }
}

fn default_definition_weight() -> f64 {
    0.4
}
fn default_example_weight() -> f64 {
    0.3
}
fn default_length_weight() -> f64 {
    0.3
}
fn default_min_body_chars() -> usize {
    400
}

/// Per-pattern relationship weights. Tunable, not contractual.
#[derive(Debug, Deserialize, Clone)]
pub struct RelationsConfig {
    #[serde(default = "default_part_of_weight")]
    pub part_of_weight: f64,
    #[serde(default = "default_causes_weight")]
    pub causes_weight: f64,
    #[serde(default = "default_precedes_weight")]
    pub precedes_weight: f64,
    #[serde(default = "default_contrasts_weight")]
    pub contrasts_weight: f64,
    #[serde(default = "default_requires_weight")]
    pub requires_weight: f64,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        RelationsConfig {
            part_of_weight: default_part_of_weight(),
            causes_weight: default_causes_weight(),
            precedes_weight: default_precedes_weight(),
            contrasts_weight: default_contrasts_weight(),
            requires_weight: default_requires_weight(),
        }
    }
}

fn default_part_of_weight() -> f64 {
    0.8
}
fn default_causes_weight() -> f64 {
    0.7
}
fn default_precedes_weight() -> f64 {
    0.6
}
fn default_contrasts_weight() -> f64 {
    0.5
}
fn default_requires_weight() -> f64 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hashgram` (deterministic, local) or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hashgram".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Default minimum quality_score for results.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    /// Over-fetch floor for index candidates before filtering.
    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: usize,
    /// Cache TTL for (query, filters) → result ids.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: i64,
    /// Max outgoing edges surfaced per result by relationship expansion.
    #[serde(default = "default_max_related")]
    pub max_related: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            quality_threshold: default_quality_threshold(),
            candidate_floor: default_candidate_floor(),
            cache_ttl_secs: default_cache_ttl_secs(),
            max_related: default_max_related(),
        }
    }
}

fn default_quality_threshold() -> f64 {
    0.5
}
fn default_candidate_floor() -> usize {
    32
}
fn default_cache_ttl_secs() -> i64 {
    6 * 3600
}
fn default_max_related() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_sources_path")]
    pub sources_path: PathBuf,
    #[serde(default = "default_terms_path")]
    pub terms_path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            sources_path: default_sources_path(),
            terms_path: default_terms_path(),
        }
    }
}

fn default_sources_path() -> PathBuf {
    PathBuf::from("./data/sources.toml")
}
fn default_terms_path() -> PathBuf {
    PathBuf::from("./data/terms.toml")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(0.0..=1.0).contains(&config.search.quality_threshold) {
        anyhow::bail!("search.quality_threshold must be in [0.0, 1.0]");
    }

    if config.search.cache_ttl_secs < 1 {
        anyhow::bail!("search.cache_ttl_secs must be >= 1");
    }

    if config.crawler.min_request_interval_ms == 0 {
        anyhow::bail!("crawler.min_request_interval_ms must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.embedding.provider.as_str() {
        "hashgram" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hashgram or openai.",
            other
        ),
    }

    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        anyhow::bail!("embedding.model must be specified when provider is 'openai'");
    }

    let weights = [
        config.relations.part_of_weight,
        config.relations.causes_weight,
        config.relations.precedes_weight,
        config.relations.contrasts_weight,
        config.relations.requires_weight,
    ];
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        anyhow::bail!("relation weights must be in [0.0, 1.0]");
    }

    Ok(config)
}

impl Config {
    /// Minimal in-memory config for tests.
    pub fn for_db_path(path: PathBuf) -> Config {
        Config {
            db: DbConfig { path },
            crawler: CrawlerConfig::default(),
            scoring: ScoringConfig::default(),
            relations: RelationsConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::for_db_path(PathBuf::from("/tmp/lore.db"));
        assert_eq!(cfg.search.quality_threshold, 0.5);
        assert_eq!(cfg.search.cache_ttl_secs, 6 * 3600);
        assert_eq!(cfg.embedding.provider, "hashgram");
        assert_eq!(cfg.crawler.robots_ttl_hours, 24);
    }

    #[test]
    fn rejects_bad_threshold() {
        let toml_str = r#"
            [db]
            path = "/tmp/lore.db"
            [search]
            quality_threshold = 1.5
        "#;
        let tmp = std::env::temp_dir().join("lore-bad-config-test.toml");
        std::fs::write(&tmp, toml_str).unwrap();
        let err = load_config(&tmp).unwrap_err();
        assert!(err.to_string().contains("quality_threshold"));
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn rejects_unknown_provider() {
        let toml_str = r#"
            [db]
            path = "/tmp/lore.db"
            [embedding]
            provider = "quantum"
        "#;
        let tmp = std::env::temp_dir().join("lore-bad-provider-test.toml");
        std::fs::write(&tmp, toml_str).unwrap();
        let err = load_config(&tmp).unwrap_err();
        assert!(err.to_string().contains("embedding provider"));
        std::fs::remove_file(&tmp).ok();
    }
}
