//! Document normalization: term extraction, scoring, and entry upsert.
//!
//! `normalize_document` is the single write path into `concept_entries`.
//! Quality is a deterministic function of relevance, completeness, and
//! source trust; it is recomputed on every upsert and never hand-edited.
//! Merging an existing entry with a fresh observation goes through the
//! explicit [`merge_entry`] function, never ad-hoc field mutation.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::extractor::{TermDictionary, TermMatch};
use crate::models::{ConceptEntry, RawDocument, Source};
use crate::relations::split_sentences;
use crate::store;

/// Result of upserting one normalized document.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub entry_id: String,
    pub created: bool,
}

/// Normalize one raw document into concept entries, one per dictionary
/// term found in the text, and upsert each. Documents matching no term
/// yield an empty outcome list.
pub async fn normalize_document(
    pool: &SqlitePool,
    dict: &TermDictionary,
    scoring: &ScoringConfig,
    source: &Source,
    doc: &RawDocument,
) -> Result<Vec<UpsertOutcome>> {
    let mut outcomes = Vec::new();
    for term_match in dict.matches(&doc.text) {
        let incoming = build_entry(scoring, source, doc, &term_match);
        outcomes.push(upsert_entry(pool, incoming).await?);
    }
    Ok(outcomes)
}

/// Build a candidate entry from a scrubbed document and its term match.
pub fn build_entry(
    scoring: &ScoringConfig,
    source: &Source,
    doc: &RawDocument,
    term_match: &TermMatch<'_>,
) -> ConceptEntry {
    let def = term_match.def;

    let relevance = relevance_score(&doc.text, def);
    let definition = definition_sentence(&doc.text, def);
    let completeness = completeness_score(
        scoring,
        definition.is_some(),
        !doc.examples.is_empty(),
        doc.text.len(),
    );
    let quality = quality_score(relevance, completeness, source.trust_level.weight());

    let summary = definition.unwrap_or_else(|| truncate_chars(&doc.text, 240));
    let now = Utc::now().timestamp();

    ConceptEntry {
        id: Uuid::new_v4().to_string(),
        canonical_term: def.canonical.clone(),
        aliases: sorted_dedup(def.aliases.clone()),
        category: def.category,
        difficulty: def.difficulty,
        asset_classes: {
            let mut a = def.asset_classes.clone();
            a.sort();
            a.dedup();
            a
        },
        summary,
        body: doc.text.clone(),
        quality_score: quality,
        relevance_score: relevance,
        completeness_score: completeness,
        source_ref: doc.content_hash.clone(),
        source_url: doc.url.clone(),
        verified: false,
        active: true,
        usage_count: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Proportion of document tokens inside the term's keyword set, in [0, 1].
/// The canonical name and aliases count as keywords.
pub fn relevance_score(text: &str, def: &crate::extractor::TermDef) -> f64 {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return 0.0;
    }

    let mut keyword_tokens: Vec<String> = def.keywords.iter().flat_map(|k| tokenize(k)).collect();
    keyword_tokens.extend(tokenize(&def.canonical));
    for alias in &def.aliases {
        keyword_tokens.extend(tokenize(alias));
    }
    keyword_tokens.sort();
    keyword_tokens.dedup();

    let matched = tokens
        .iter()
        .filter(|t| keyword_tokens.binary_search(t).is_ok())
        .count();

    (matched as f64 / tokens.len() as f64).clamp(0.0, 1.0)
}

/// Fixed-weight presence scoring: definition sentence + example + length.
pub fn completeness_score(
    scoring: &ScoringConfig,
    has_definition: bool,
    has_example: bool,
    body_chars: usize,
) -> f64 {
    let mut score = 0.0;
    if has_definition {
        score += scoring.definition_weight;
    }
    if has_example {
        score += scoring.example_weight;
    }
    if body_chars >= scoring.min_body_chars {
        score += scoring.length_weight;
    }
    score.clamp(0.0, 1.0)
}

/// quality = 0.5·relevance + 0.3·completeness + 0.2·trust, clamped to [0, 1].
pub fn quality_score(relevance: f64, completeness: f64, trust_weight: f64) -> f64 {
    (0.5 * relevance + 0.3 * completeness + 0.2 * trust_weight).clamp(0.0, 1.0)
}

/// First sentence that names the term and then defines it
/// ("<term> is/are/refers to/means ...").
pub fn definition_sentence(text: &str, def: &crate::extractor::TermDef) -> Option<String> {
    let names: Vec<String> = std::iter::once(def.canonical.to_lowercase())
        .chain(def.aliases.iter().map(|a| a.to_lowercase()))
        .collect();

    for sentence in split_sentences(text) {
        let lower = sentence.to_lowercase();
        let Some(pos) = names.iter().filter_map(|n| lower.find(n.as_str())).min() else {
            continue;
        };
        let tail = &lower[pos..];
        if tail.contains(" is ")
            || tail.contains(" are ")
            || tail.contains(" refers to ")
            || tail.contains(" means ")
        {
            return Some(sentence.trim().to_string());
        }
    }
    None
}

/// Merge a fresh observation into an existing entry.
///
/// Aliases are unioned; the higher-quality side contributes summary, body,
/// scores, and source reference. Identity, category, creation time, the
/// verified flag, and usage count always come from the existing entry.
pub fn merge_entry(existing: &ConceptEntry, incoming: &ConceptEntry) -> ConceptEntry {
    let better = if incoming.quality_score > existing.quality_score {
        incoming
    } else {
        existing
    };

    let mut aliases = existing.aliases.clone();
    aliases.extend(incoming.aliases.iter().cloned());
    let aliases = sorted_dedup(aliases);

    let mut asset_classes = existing.asset_classes.clone();
    asset_classes.extend(incoming.asset_classes.iter().copied());
    asset_classes.sort();
    asset_classes.dedup();

    ConceptEntry {
        id: existing.id.clone(),
        canonical_term: existing.canonical_term.clone(),
        aliases,
        category: existing.category,
        difficulty: existing.difficulty,
        asset_classes,
        summary: better.summary.clone(),
        body: better.body.clone(),
        quality_score: better.quality_score,
        relevance_score: better.relevance_score,
        completeness_score: better.completeness_score,
        source_ref: better.source_ref.clone(),
        source_url: better.source_url.clone(),
        verified: existing.verified,
        active: existing.active,
        usage_count: existing.usage_count,
        created_at: existing.created_at,
        updated_at: Utc::now().timestamp(),
    }
}

/// Insert or merge-update an entry keyed by (canonical_term, category).
///
/// Safe under concurrent callers for the same key: the insert carries
/// `ON CONFLICT DO NOTHING`, and a caller that loses the insert race
/// loops back and merges into the winner's row instead.
pub async fn upsert_entry(pool: &SqlitePool, incoming: ConceptEntry) -> Result<UpsertOutcome> {
    loop {
        let existing_row = sqlx::query(&format!(
            "SELECT {} FROM concept_entries WHERE canonical_term = ? AND category = ?",
            store::ENTRY_COLUMNS
        ))
        .bind(&incoming.canonical_term)
        .bind(incoming.category.as_str())
        .fetch_optional(pool)
        .await?;

        if let Some(row) = existing_row {
            let existing = store::entry_from_row(&row)?;
            let merged = merge_entry(&existing, &incoming);
            sqlx::query(
                r#"
                UPDATE concept_entries SET
                    aliases = ?, difficulty = ?, asset_classes = ?,
                    summary = ?, body = ?,
                    quality_score = ?, relevance_score = ?, completeness_score = ?,
                    source_ref = ?, source_url = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(store::aliases_to_json(&merged.aliases))
            .bind(merged.difficulty.as_str())
            .bind(store::assets_to_json(&merged.asset_classes))
            .bind(&merged.summary)
            .bind(&merged.body)
            .bind(merged.quality_score)
            .bind(merged.relevance_score)
            .bind(merged.completeness_score)
            .bind(&merged.source_ref)
            .bind(&merged.source_url)
            .bind(merged.updated_at)
            .bind(&merged.id)
            .execute(pool)
            .await?;

            return Ok(UpsertOutcome {
                entry_id: merged.id,
                created: false,
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO concept_entries
                (id, canonical_term, aliases, category, difficulty, asset_classes,
                 summary, body, quality_score, relevance_score, completeness_score,
                 source_ref, source_url, verified, active, usage_count,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_term, category) DO NOTHING
            "#,
        )
        .bind(&incoming.id)
        .bind(&incoming.canonical_term)
        .bind(store::aliases_to_json(&incoming.aliases))
        .bind(incoming.category.as_str())
        .bind(incoming.difficulty.as_str())
        .bind(store::assets_to_json(&incoming.asset_classes))
        .bind(&incoming.summary)
        .bind(&incoming.body)
        .bind(incoming.quality_score)
        .bind(incoming.relevance_score)
        .bind(incoming.completeness_score)
        .bind(&incoming.source_ref)
        .bind(&incoming.source_url)
        .bind(incoming.verified as i64)
        .bind(incoming.active as i64)
        .bind(incoming.usage_count)
        .bind(incoming.created_at)
        .bind(incoming.updated_at)
        .execute(pool)
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(UpsertOutcome {
                entry_id: incoming.id,
                created: true,
            });
        }
        // Another writer created the row between the read and the insert;
        // the next pass merges into it.
    }
}

/// Externally triggered verification; never performed by the normalizer.
pub async fn set_verified(pool: &SqlitePool, entry_id: &str, verified: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE concept_entries SET verified = ? WHERE id = ?")
        .bind(verified as i64)
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Soft-delete: entries are deactivated, never removed.
pub async fn set_active(pool: &SqlitePool, entry_id: &str, active: bool) -> Result<bool> {
    let result = sqlx::query("UPDATE concept_entries SET active = ? WHERE id = ?")
        .bind(active as i64)
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn sorted_dedup(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v.dedup();
    v
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
