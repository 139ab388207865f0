//! Narrative enrichment with knowledge citations.
//!
//! Takes an external context (a small ordered set of domain terms plus a
//! base narrative) and weaves in short, attributed explanations for every
//! term the knowledge base can resolve. A term resolves only to a
//! verified entry whose canonical name or alias matches it; anything else
//! is skipped silently. With zero resolved terms the base narrative is
//! returned unchanged with an empty trace. This layer never fails the
//! caller over missing knowledge.

use anyhow::Result;
use tracing::warn;

use crate::models::{ProvenanceEntry, SearchFilters};
use crate::relations::split_sentences;
use crate::search::KnowledgeSearch;

/// Enrich a base narrative with explanations for the given terms.
///
/// Returns the enriched narrative and a provenance trace with one element
/// per inserted explanation, in insertion order.
pub async fn enrich(
    search: &KnowledgeSearch,
    context_terms: &[String],
    base_narrative: &str,
) -> Result<(String, Vec<ProvenanceEntry>)> {
    let mut narrative = base_narrative.to_string();
    let mut trace: Vec<ProvenanceEntry> = Vec::new();

    let filters = SearchFilters {
        high_quality_only: true,
        ..Default::default()
    };

    for term in dedup_preserving_order(context_terms) {
        // A lookup failure degrades to a skipped term, never an error.
        let hits = match search.query(&term, &filters, 5, false).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(term = %term, error = %e, "knowledge lookup failed, skipping term");
                continue;
            }
        };

        // Similarity alone is not resolution: the entry must actually be
        // named by the term, or a nearby verified entry would be cited
        // for a term the knowledge base does not know.
        let Some(hit) = hits.into_iter().find(|h| names_entry(&term, &h.entry)) else {
            continue;
        };
        let entry = hit.entry;

        let clause = format!(
            " {}: {} (per {}).",
            entry.canonical_term,
            explanation_snippet(&entry.summary),
            entry.source_url
        );
        narrative.push_str(&clause);

        bump_usage(search, &entry.id).await;

        trace.push(ProvenanceEntry {
            entry_id: entry.id,
            canonical_term: entry.canonical_term,
            source_ref: entry.source_ref,
        });
    }

    Ok((narrative, trace))
}

fn names_entry(term: &str, entry: &crate::models::ConceptEntry) -> bool {
    let t = term.to_lowercase();
    entry.canonical_term.to_lowercase() == t
        || entry.aliases.iter().any(|a| a.to_lowercase() == t)
}

/// First sentence of the summary, bounded to keep clauses short.
fn explanation_snippet(summary: &str) -> String {
    let first = split_sentences(summary)
        .into_iter()
        .next()
        .unwrap_or(summary);
    let snippet: String = first.chars().take(200).collect();
    snippet.trim_end_matches('.').to_string()
}

fn dedup_preserving_order(terms: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for term in terms {
        let key = term.trim().to_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(term.trim().to_string());
    }
    out
}

async fn bump_usage(search: &KnowledgeSearch, entry_id: &str) {
    let result =
        sqlx::query("UPDATE concept_entries SET usage_count = usage_count + 1 WHERE id = ?")
            .bind(entry_id)
            .execute(search.pool())
            .await;
    if let Err(e) = result {
        warn!(entry_id = %entry_id, error = %e, "failed to bump usage count");
    }
}
