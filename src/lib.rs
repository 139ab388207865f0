//! # Marketlore
//!
//! A compliant knowledge pipeline for trading education content.
//!
//! Marketlore crawls a curated catalog of trading-education sites (robots
//! rules and per-domain rate limits respected), scrubs pages down to
//! their main text, matches them against a hand-maintained term
//! dictionary, and normalizes matches into scored concept entries plus a
//! typed relationship graph. Entries are embedded into a vector index
//! served from immutable snapshots, queried through a TTL-cached filtered
//! search, and surfaced by a contextualizer that enriches narratives with
//! cited explanations.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌───────────┐   ┌─────────┐
//! │ Crawler  │──▶│ Scrub  │──▶│ Normalize │──▶│ SQLite  │
//! │ +robots  │   │ +terms │   │ +relate   │   │         │
//! └──────────┘   └────────┘   └───────────┘   └────┬────┘
//!                                                  │
//!                              ┌───────────────────┤
//!                              ▼                   ▼
//!                        ┌───────────┐      ┌─────────────┐
//!                        │  Vector   │─────▶│   Search    │
//!                        │  Index    │      │ +Contextual │
//!                        └───────────┘      └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lore init                        # create database
//! lore init-sources                # sync the source catalog
//! lore crawl --all                 # crawl every active source
//! lore rebuild-index               # build the vector index
//! lore search "fair value gap"     # query the knowledge base
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`compliance`] | robots.txt policy and per-domain rate limiting |
//! | [`crawler`] | Discovery, fetch, fingerprint |
//! | [`scrub`] | HTML boilerplate stripping |
//! | [`extractor`] | Term dictionary matching |
//! | [`normalize`] | Concept entry scoring and upsert |
//! | [`relations`] | Relationship graph extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Snapshot-swapped vector index |
//! | [`cache`] | TTL query cache |
//! | [`search`] | Filtered knowledge search |
//! | [`contextualize`] | Narrative enrichment with provenance |
//! | [`sources`] | Source catalog management |
//! | [`store`] | Shared row mapping and entry queries |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cache;
pub mod compliance;
pub mod config;
pub mod contextualize;
pub mod crawler;
pub mod db;
pub mod embedding;
pub mod extractor;
pub mod index;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod relations;
pub mod scrub;
pub mod search;
pub mod sources;
pub mod store;
