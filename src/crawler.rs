//! Polite crawler: discovery, fetch, scrub, fingerprint.
//!
//! Every fetch passes the [`ComplianceGate`] twice, once for the robots
//! verdict and once for the per-domain rate slot. Page-level failures are
//! recorded on the crawl log and never abort the crawl; only setup
//! failures (bad source, unreachable database) do. Crawls stay on the
//! source's domain regardless of where discovery or links point.
//!
//! [`run_crawl`] is the CLI orchestration: crawl, normalize, detect
//! relationships, persist the audit log, and optionally rebuild the
//! vector index afterwards.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::warn;
use url::Url;

use crate::compliance::ComplianceGate;
use crate::config::Config;
use crate::db;
use crate::extractor::TermDictionary;
use crate::index::VectorIndex;
use crate::models::{CrawlLog, DiscoveryMode, RawDocument, Source};
use crate::normalize;
use crate::relations;
use crate::scrub;
use crate::store;

/// Crawl one source: discover candidate URLs, fetch each compliant page,
/// scrub it, and emit fingerprinted documents. Pages whose fingerprint is
/// already in the entry store are skipped.
///
/// The returned log is not yet finished or persisted; the caller adds
/// normalization counts and calls [`persist_log`].
pub async fn crawl(
    pool: &SqlitePool,
    gate: &ComplianceGate,
    config: &Config,
    source: &Source,
    max_pages: i64,
    stop: &AtomicBool,
) -> Result<(Vec<RawDocument>, CrawlLog)> {
    let mut log = CrawlLog::begin(&source.id);
    let mut docs = Vec::new();

    let base = Url::parse(&source.base_url)
        .with_context(|| format!("Source '{}' has an invalid base_url", source.name))?;
    let Some(domain) = base.host_str().map(|h| h.to_string()) else {
        bail!("Source '{}' base_url has no host", source.name);
    };

    let client = reqwest::Client::builder()
        .user_agent(config.crawler.user_agent.clone())
        .timeout(Duration::from_secs(config.crawler.fetch_timeout_secs))
        .build()?;

    let mut frontier: VecDeque<Url> = VecDeque::new();
    match source.discovery_mode {
        DiscoveryMode::Links => frontier.push_back(base.clone()),
        mode => {
            match discover_feed(&client, gate, source, &base, mode).await {
                Ok(urls) => frontier.extend(urls),
                Err(e) => {
                    log.errors.push(format!("discovery: {}", e));
                }
            }
            // A dead feed still leaves the landing page crawlable.
            if frontier.is_empty() {
                frontier.push_back(base.clone());
            }
        }
    }

    let mut visited: HashSet<String> = HashSet::new();

    while let Some(url) = frontier.pop_front() {
        if stop.load(Ordering::Relaxed) || log.pages_fetched >= max_pages {
            break;
        }
        if url.host_str() != Some(domain.as_str()) {
            continue;
        }
        if !visited.insert(url.to_string()) {
            continue;
        }
        if !gate.allowed(&url).await {
            continue;
        }

        gate.wait_slot(&domain).await;

        let html = match fetch_page(&client, &url).await {
            Ok(html) => html,
            Err(e) => {
                log.errors.push(format!("{}: {}", url, e));
                continue;
            }
        };
        log.pages_fetched += 1;

        if source.discovery_mode == DiscoveryMode::Links {
            for link in scrub::extract_links(&html, &url) {
                if link.host_str() == Some(domain.as_str())
                    && !visited.contains(link.as_str())
                {
                    frontier.push_back(link);
                }
            }
        }

        let page = scrub::scrub(&html);
        if page.text.trim().is_empty() {
            continue;
        }

        let content_hash = format!("{:x}", Sha256::digest(page.text.as_bytes()));
        if store::fingerprint_exists(pool, &content_hash).await? {
            continue;
        }

        docs.push(RawDocument {
            source_id: source.id.clone(),
            url: url.to_string(),
            fetched_at: Utc::now(),
            content_hash,
            text: page.text,
            examples: page.examples,
        });
    }

    Ok((docs, log))
}

async fn fetch_page(client: &reqwest::Client, url: &Url) -> Result<String> {
    let resp = client.get(url.clone()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("HTTP {}", status);
    }
    Ok(resp.text().await?)
}

/// Fetch and parse the source's sitemap or RSS feed into candidate URLs.
async fn discover_feed(
    client: &reqwest::Client,
    gate: &ComplianceGate,
    source: &Source,
    base: &Url,
    mode: DiscoveryMode,
) -> Result<Vec<Url>> {
    let default_path = match mode {
        DiscoveryMode::Sitemap => "/sitemap.xml",
        DiscoveryMode::Rss => "/feed",
        DiscoveryMode::Links => return Ok(Vec::new()),
    };

    let feed_url = match &source.feed_url {
        Some(explicit) => Url::parse(explicit)
            .with_context(|| format!("Source '{}' has an invalid feed_url", source.name))?,
        None => base.join(default_path)?,
    };

    if !gate.allowed(&feed_url).await {
        bail!("robots policy disallows {}", feed_url);
    }
    if let Some(domain) = feed_url.host_str() {
        gate.wait_slot(domain).await;
    }

    let xml = fetch_page(client, &feed_url).await?;
    let locs = match mode {
        DiscoveryMode::Sitemap => parse_sitemap(&xml)?,
        DiscoveryMode::Rss => parse_rss(&xml)?,
        DiscoveryMode::Links => Vec::new(),
    };

    Ok(locs
        .iter()
        .filter_map(|loc| Url::parse(loc).ok())
        .collect())
}

/// `<loc>` values from a sitemap document, in document order.
pub fn parse_sitemap(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut locs = Vec::new();
    let mut in_loc = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"loc" => in_loc = true,
            Event::End(e) if e.name().as_ref() == b"loc" => in_loc = false,
            Event::Text(t) if in_loc => {
                locs.push(t.unescape()?.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(locs)
}

/// `<item><link>` values from an RSS document, in document order.
pub fn parse_rss(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut links = Vec::new();
    let mut in_item = false;
    let mut in_link = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"item" => in_item = true,
                b"link" if in_item => in_link = true,
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"item" => in_item = false,
                b"link" => in_link = false,
                _ => {}
            },
            Event::Text(t) if in_link => {
                links.push(t.unescape()?.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(links)
}

/// Insert one finished crawl log row. Logs are append-only; nothing ever
/// updates or deletes them.
pub async fn persist_log(pool: &SqlitePool, log: &CrawlLog) -> Result<()> {
    let errors_json = serde_json::to_string(&log.errors)?;
    sqlx::query(
        r#"
        INSERT INTO crawl_logs
        (id, source_id, started_at, finished_at, pages_fetched, entries_created, entries_updated, errors)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&log.id)
    .bind(&log.source_id)
    .bind(log.started_at)
    .bind(log.finished_at)
    .bind(log.pages_fetched)
    .bind(log.entries_created)
    .bind(log.entries_updated)
    .bind(errors_json)
    .execute(pool)
    .await?;
    Ok(())
}

/// Crawl, normalize, and relate one source end to end.
async fn process_source(
    pool: &SqlitePool,
    gate: &ComplianceGate,
    config: &Config,
    dict: &TermDictionary,
    source: &Source,
    max_pages: i64,
    stop: &AtomicBool,
) -> Result<CrawlLog> {
    let (docs, mut log) = crawl(pool, gate, config, source, max_pages, stop).await?;

    for doc in &docs {
        match normalize::normalize_document(pool, dict, &config.scoring, source, doc).await {
            Ok(outcomes) if !outcomes.is_empty() => {
                for outcome in &outcomes {
                    if outcome.created {
                        log.entries_created += 1;
                    } else {
                        log.entries_updated += 1;
                    }
                }
                let detections = relations::detect(&doc.text, dict, &config.relations);
                if let Err(e) = relations::store_detections(pool, &detections).await {
                    log.errors.push(format!("relations {}: {}", doc.url, e));
                }
            }
            Ok(_) => {}
            Err(e) => {
                log.errors.push(format!("normalize {}: {}", doc.url, e));
            }
        }
    }

    log.finished_at = Some(Utc::now().timestamp());
    persist_log(pool, &log).await?;
    Ok(log)
}

/// CLI entry point for `crawl`. Crawls one named source or every active
/// source, then optionally rebuilds the vector index.
pub async fn run_crawl(
    config: &Config,
    source_name: Option<&str>,
    max_pages: Option<i64>,
    rebuild_index: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let dict = Arc::new(TermDictionary::load(&config.catalog.terms_path)?);
    let gate = Arc::new(ComplianceGate::new(&config.crawler)?);

    let sources: Vec<Source> = match source_name {
        Some(name) => {
            let Some(source) = store::source_by_name(&pool, name).await? else {
                bail!("Unknown source: '{}'. Run `lore sources` to list them.", name);
            };
            if !source.active {
                bail!("Source '{}' is inactive.", name);
            }
            vec![source]
        }
        None => {
            let all = store::active_sources(&pool).await?;
            if all.is_empty() {
                bail!("No active sources. Run `lore init-sources` first.");
            }
            all
        }
    };

    // First ctrl-c stops new fetches; in-flight pages finish and logs are
    // still persisted.
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current pages");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut handles = Vec::new();
    for source in sources {
        let pool = pool.clone();
        let gate = gate.clone();
        let config = config.clone();
        let dict = dict.clone();
        let stop = stop.clone();
        let pages = max_pages.unwrap_or_else(|| {
            if source.max_pages_per_crawl > 0 {
                source.max_pages_per_crawl
            } else {
                config.crawler.default_max_pages
            }
        });
        handles.push(tokio::spawn(async move {
            let name = source.name.clone();
            let result =
                process_source(&pool, &gate, &config, &dict, &source, pages, &stop).await;
            (name, result)
        }));
    }

    let mut failures = 0usize;
    for handle in handles {
        let (name, result) = handle.await?;
        match result {
            Ok(log) => {
                println!(
                    "{}: {} pages, {} created, {} updated, {} errors",
                    name,
                    log.pages_fetched,
                    log.entries_created,
                    log.entries_updated,
                    log.errors.len()
                );
                for err in &log.errors {
                    println!("  error: {}", err);
                }
            }
            Err(e) => {
                failures += 1;
                println!("{}: crawl failed: {:#}", name, e);
            }
        }
    }

    if rebuild_index {
        let provider = crate::embedding::create_provider(&config.embedding)?;
        let index = VectorIndex::new(crate::index::Snapshot::empty(
            provider.model_name(),
            provider.dims(),
        ));
        let meta = index.rebuild(&pool, &config.embedding).await?;
        println!(
            "Index rebuilt: {} entries, version {}",
            meta.entry_count, meta.version
        );
    }

    pool.close().await;

    if failures > 0 {
        bail!("{} source(s) failed to crawl", failures);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sitemap_locs_parse_in_order() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://example.com/a</loc><lastmod>2024-01-01</lastmod></url>
              <url><loc>https://example.com/b?x=1&amp;y=2</loc></url>
            </urlset>"#;
        let locs = parse_sitemap(xml).unwrap();
        assert_eq!(
            locs,
            vec!["https://example.com/a", "https://example.com/b?x=1&y=2"]
        );
    }

    #[test]
    fn rss_links_only_from_items() {
        let xml = r#"<rss version="2.0"><channel>
            <link>https://example.com/</link>
            <item><title>one</title><link>https://example.com/posts/1</link></item>
            <item><link>https://example.com/posts/2</link></item>
        </channel></rss>"#;
        let links = parse_rss(xml).unwrap();
        assert_eq!(
            links,
            vec!["https://example.com/posts/1", "https://example.com/posts/2"]
        );
    }

    #[test]
    fn empty_sitemap_yields_no_urls() {
        let xml = r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"></urlset>"#;
        assert!(parse_sitemap(xml).unwrap().is_empty());
    }
}
