//! # Marketlore CLI (`lore`)
//!
//! The `lore` binary is the primary interface for Marketlore. It provides
//! commands for database initialization, source catalog management,
//! crawling, index rebuilding, knowledge search, and narrative
//! enrichment.
//!
//! ## Usage
//!
//! ```bash
//! lore --config ./config/lore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore init-sources` | Sync the source catalog file into the database |
//! | `lore sources` | List active sources with last-crawl stats |
//! | `lore crawl --all` | Crawl every active source |
//! | `lore crawl --source <name>` | Crawl one source |
//! | `lore rebuild-index` | Rebuild the vector index from the entry store |
//! | `lore search "<query>"` | Search the knowledge base |
//! | `lore enrich --term <t>` | Enrich a narrative with cited explanations |
//! | `lore verify <entry-id>` | Mark an entry as editorially verified |
//!
//! ## Examples
//!
//! ```bash
//! # First run
//! lore init
//! lore init-sources
//! lore crawl --all --rebuild-index
//!
//! # Filtered search with relationship expansion
//! lore search "liquidity sweep" --category structure --related
//!
//! # Enrich a trade review with sourced definitions
//! lore enrich --term "order block" --term "fair value gap" \
//!     --narrative "Price tapped the zone and reversed."
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use marketlore::config;
use marketlore::contextualize;
use marketlore::crawler;
use marketlore::db;
use marketlore::embedding;
use marketlore::index::{Snapshot, VectorIndex};
use marketlore::migrate;
use marketlore::models::{AssetClass, Category, SearchFilters};
use marketlore::normalize;
use marketlore::search::{self, KnowledgeSearch};
use marketlore::sources;

/// Marketlore CLI, a compliant knowledge pipeline for trading education
/// content.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lore.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "A compliant knowledge pipeline for trading education content",
    version,
    long_about = "Marketlore crawls curated trading-education sites (robots rules and rate \
    limits respected), normalizes pages into scored concept entries and a relationship graph, \
    indexes them with deterministic embeddings, and serves filtered semantic search plus \
    narrative enrichment with provenance."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lore.toml`. All crawler, scoring, embedding,
    /// and search settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent; running it multiple times is safe.
    Init,

    /// Sync the source catalog file into the database.
    ///
    /// Reads the catalog at `catalog.sources_path` and upserts each entry
    /// by name. A missing or corrupt catalog file is a fatal error.
    InitSources,

    /// List active sources with their last-crawl stats.
    Sources,

    /// Crawl one source or every active source.
    ///
    /// Fetches pages through the robots and rate-limit gate, scrubs them,
    /// and normalizes matched terms into concept entries. Page-level
    /// errors are logged and skipped; the crawl continues.
    Crawl {
        /// Crawl a single source by its catalog name.
        #[arg(long, conflicts_with = "all")]
        source: Option<String>,

        /// Crawl every active source concurrently.
        #[arg(long)]
        all: bool,

        /// Override the per-source page limit for this run.
        #[arg(long)]
        max_pages: Option<i64>,

        /// Rebuild the vector index after the crawl finishes.
        #[arg(long)]
        rebuild_index: bool,
    },

    /// Rebuild the vector index from the current entry store.
    ///
    /// Embeds every active entry, persists a new snapshot, and atomically
    /// makes it current. Required after switching embedding provider,
    /// model, or dimensions.
    RebuildIndex,

    /// Search the knowledge base.
    ///
    /// Embeds the query, ranks entries by cosine similarity, and applies
    /// filters. Results are cached per (query, filters) for the
    /// configured TTL.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 5)]
        k: usize,

        /// Filter by category: structure, indicator, risk, psychology,
        /// strategy, or execution.
        #[arg(long)]
        category: Option<String>,

        /// Filter by asset class: forex, crypto, equities, futures,
        /// commodities, or indices.
        #[arg(long)]
        asset_class: Option<String>,

        /// Override the configured minimum quality score.
        #[arg(long)]
        min_quality: Option<f64>,

        /// Only return editorially verified entries.
        #[arg(long)]
        high_quality: bool,

        /// Include related concepts for each result.
        #[arg(long)]
        related: bool,
    },

    /// Enrich a narrative with cited explanations for the given terms.
    ///
    /// Each term is resolved against verified knowledge entries; resolved
    /// terms get an attributed explanation appended to the narrative.
    /// Unresolvable terms are skipped silently.
    Enrich {
        /// A term to explain. Repeatable.
        #[arg(long = "term", required = true)]
        terms: Vec<String>,

        /// Base narrative to enrich. Defaults to an empty narrative.
        #[arg(long)]
        narrative: Option<String>,
    },

    /// Mark a concept entry as editorially verified (or revoke it).
    ///
    /// Verified entries pass the `--high-quality` search filter and are
    /// eligible for narrative enrichment.
    Verify {
        /// Entry UUID.
        entry_id: String,

        /// Revoke verification instead of granting it.
        #[arg(long)]
        revoke: bool,
    },
}

fn parse_category(s: &str) -> Result<Category> {
    Category::parse(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown category '{}'. Expected one of: structure, indicator, risk, \
             psychology, strategy, execution.",
            s
        )
    })
}

fn parse_asset_class(s: &str) -> Result<AssetClass> {
    AssetClass::parse(s).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown asset class '{}'. Expected one of: forex, crypto, equities, \
             futures, commodities, indices.",
            s
        )
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::InitSources => {
            sources::run_init_sources(&cfg).await?;
        }
        Commands::Sources => {
            sources::run_list_sources(&cfg).await?;
        }
        Commands::Crawl {
            source,
            all,
            max_pages,
            rebuild_index,
        } => {
            if source.is_none() && !all {
                bail!("Specify --source <name> or --all.");
            }
            crawler::run_crawl(&cfg, source.as_deref(), max_pages, rebuild_index).await?;
        }
        Commands::RebuildIndex => {
            let pool = db::connect(&cfg).await?;
            let provider = embedding::create_provider(&cfg.embedding)?;
            let index = VectorIndex::new(Snapshot::empty(provider.model_name(), provider.dims()));
            let meta = index.rebuild(&pool, &cfg.embedding).await?;
            println!(
                "Index rebuilt: {} entries, {} dims, model {}, version {}",
                meta.entry_count, meta.vector_dimension, meta.model, meta.version
            );
            pool.close().await;
        }
        Commands::Search {
            query,
            k,
            category,
            asset_class,
            min_quality,
            high_quality,
            related,
        } => {
            let filters = SearchFilters {
                category: category.as_deref().map(parse_category).transpose()?,
                asset_class: asset_class.as_deref().map(parse_asset_class).transpose()?,
                min_quality,
                high_quality_only: high_quality,
            };
            search::run_search(&cfg, &query, k, &filters, related).await?;
        }
        Commands::Enrich { terms, narrative } => {
            let pool = db::connect(&cfg).await?;
            let index = Arc::new(VectorIndex::load_current(&pool, &cfg.embedding).await?);
            let search = KnowledgeSearch::new(pool.clone(), index, cfg.clone());

            let base = narrative.unwrap_or_default();
            let (enriched, trace) = contextualize::enrich(&search, &terms, &base).await?;

            println!("{}", enriched);
            if trace.is_empty() {
                println!("\n(no terms resolved)");
            } else {
                println!("\nProvenance:");
                for entry in &trace {
                    println!(
                        "  {} <- entry {} (content {})",
                        entry.canonical_term, entry.entry_id, entry.source_ref
                    );
                }
            }
            pool.close().await;
        }
        Commands::Verify { entry_id, revoke } => {
            let pool = db::connect(&cfg).await?;
            let found = normalize::set_verified(&pool, &entry_id, !revoke).await?;
            if !found {
                bail!("No entry with id {}", entry_id);
            }
            println!(
                "Entry {} {}.",
                entry_id,
                if revoke { "unverified" } else { "verified" }
            );
            pool.close().await;
        }
    }

    Ok(())
}
