//! Surface-pattern relationship extraction between known concepts.
//!
//! Scans sentences containing two or more dictionary terms for a fixed
//! set of linguistic patterns ("X is part of Y", "X causes Y", ...) and
//! proposes directed, typed edges. Weights are fixed per pattern type,
//! not learned; re-detection replaces the stored weight rather than
//! accumulating it. Cycles are fine, self-loops are not.

use anyhow::Result;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;

use crate::config::RelationsConfig;
use crate::extractor::TermDictionary;
use crate::models::{Category, RelatedConcept, RelationType};

/// A proposed edge between two canonical terms, before id resolution.
/// Categories ride along because entries are keyed by (term, category).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedRelation {
    pub from_term: String,
    pub from_category: Category,
    pub to_term: String,
    pub to_category: Category,
    pub relation_type: RelationType,
    pub weight: f64,
}

/// Split text into sentences on `.`, `!`, `?` boundaries.
pub fn split_sentences(text: &str) -> Vec<&str> {
    static SENTENCE_RE: OnceLock<Regex> = OnceLock::new();
    let re = SENTENCE_RE.get_or_init(|| Regex::new(r"[^.!?]+[.!?]?").expect("static regex"));
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Scan a normalized document for relationship patterns between known
/// terms. Direction follows surface order; "is caused by" and "follows"
/// reverse it.
pub fn detect(text: &str, dict: &TermDictionary, config: &RelationsConfig) -> Vec<DetectedRelation> {
    let mut detections = Vec::new();

    for sentence in split_sentences(text) {
        let hits = dict.terms_in(sentence);
        if hits.len() < 2 {
            continue;
        }

        let lower = sentence.to_lowercase();
        for pair in hits.windows(2) {
            let (a_def, a_pos) = pair[0];
            let (b_def, b_pos) = pair[1];

            // No self-loops, including canonical-vs-alias hits of one term.
            if a_def.canonical == b_def.canonical && a_def.category == b_def.category {
                continue;
            }

            let span = &lower[a_pos..b_pos];
            let Some((relation_type, reversed)) = match_pattern(span) else {
                continue;
            };

            let (from, to) = if reversed { (b_def, a_def) } else { (a_def, b_def) };
            detections.push(DetectedRelation {
                from_term: from.canonical.clone(),
                from_category: from.category,
                to_term: to.canonical.clone(),
                to_category: to.category,
                relation_type,
                weight: pattern_weight(relation_type, config),
            });
        }
    }

    detections
}

/// Match the text between two term mentions against the pattern set.
/// Returns the relation type and whether the edge direction is reversed.
fn match_pattern(span: &str) -> Option<(RelationType, bool)> {
    // Padded so every pattern check is word-bounded.
    let padded = format!(" {} ", span);
    let has = |p: &str| padded.contains(p);

    // Passive/reversing forms first; they embed shorter active forms.
    if has(" is caused by ") || has(" are caused by ") || has(" results from ") {
        return Some((RelationType::Causes, true));
    }
    if has(" follows ") || has(" comes after ") {
        return Some((RelationType::Precedes, true));
    }
    if has(" is part of ") || has(" are part of ") || has(" forms part of ") || has(" belongs to ")
    {
        return Some((RelationType::PartOf, false));
    }
    if has(" causes ") || has(" leads to ") || has(" results in ") || has(" triggers ") {
        return Some((RelationType::Causes, false));
    }
    if has(" precedes ") || has(" comes before ") || has(" forms before ") {
        return Some((RelationType::Precedes, false));
    }
    if has(" contrasts with ")
        || has(" unlike ")
        || has(" as opposed to ")
        || has(" differs from ")
    {
        return Some((RelationType::ContrastsWith, false));
    }
    if has(" requires ") || has(" depends on ") || has(" relies on ") {
        return Some((RelationType::Requires, false));
    }
    None
}

fn pattern_weight(relation_type: RelationType, config: &RelationsConfig) -> f64 {
    match relation_type {
        RelationType::PartOf => config.part_of_weight,
        RelationType::Causes => config.causes_weight,
        RelationType::Precedes => config.precedes_weight,
        RelationType::ContrastsWith => config.contrasts_weight,
        RelationType::Requires => config.requires_weight,
    }
}

/// Resolve detected term pairs to entry ids and upsert the edges.
/// A duplicate (from, to, type) replaces the weight; terms without a
/// stored entry in the detected category are skipped.
pub async fn store_detections(
    pool: &SqlitePool,
    detections: &[DetectedRelation],
) -> Result<usize> {
    let mut stored = 0usize;

    for det in detections {
        let from_id = entry_id_for_term(pool, &det.from_term, det.from_category).await?;
        let to_id = entry_id_for_term(pool, &det.to_term, det.to_category).await?;
        let (Some(from_id), Some(to_id)) = (from_id, to_id) else {
            continue;
        };
        if from_id == to_id {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO concept_relationships (from_entry, to_entry, relation_type, weight)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(from_entry, to_entry, relation_type)
            DO UPDATE SET weight = excluded.weight
            "#,
        )
        .bind(&from_id)
        .bind(&to_id)
        .bind(det.relation_type.as_str())
        .bind(det.weight)
        .execute(pool)
        .await?;
        stored += 1;
    }

    Ok(stored)
}

async fn entry_id_for_term(
    pool: &SqlitePool,
    canonical_term: &str,
    category: Category,
) -> Result<Option<String>> {
    // (canonical_term, category) is unique, so this is at most one row.
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM concept_entries WHERE canonical_term = ? AND category = ?",
    )
    .bind(canonical_term)
    .bind(category.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Highest-weight outgoing edges for one entry, for result expansion.
pub async fn outgoing_edges(
    pool: &SqlitePool,
    entry_id: &str,
    limit: usize,
) -> Result<Vec<RelatedConcept>> {
    let rows = sqlx::query(
        r#"
        SELECT r.to_entry, r.relation_type, r.weight, e.canonical_term
        FROM concept_relationships r
        JOIN concept_entries e ON e.id = r.to_entry
        WHERE r.from_entry = ? AND e.active = 1
        ORDER BY r.weight DESC, r.to_entry ASC
        LIMIT ?
        "#,
    )
    .bind(entry_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut related = Vec::with_capacity(rows.len());
    for row in rows {
        let type_str: String = row.get("relation_type");
        let Some(relation_type) = RelationType::parse(&type_str) else {
            continue;
        };
        related.push(RelatedConcept {
            entry_id: row.get("to_entry"),
            canonical_term: row.get("canonical_term"),
            relation_type,
            weight: row.get("weight"),
        });
    }
    Ok(related)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelationsConfig;

    fn dict() -> TermDictionary {
        toml::from_str(
            r#"
            [[term]]
            canonical = "Fair Value Gap"
            aliases = ["FVG"]
            category = "structure"
            difficulty = "intermediate"

            [[term]]
            canonical = "Smart Money Concepts"
            aliases = ["SMC"]
            category = "strategy"
            difficulty = "advanced"

            [[term]]
            canonical = "Liquidity Sweep"
            aliases = []
            category = "structure"
            difficulty = "advanced"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn detects_part_of() {
        let cfg = RelationsConfig::default();
        let found = detect(
            "A Fair Value Gap (FVG) is part of Smart Money Concepts.",
            &dict(),
            &cfg,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].from_term, "Fair Value Gap");
        assert_eq!(found[0].from_category, Category::Structure);
        assert_eq!(found[0].to_term, "Smart Money Concepts");
        assert_eq!(found[0].to_category, Category::Strategy);
        assert_eq!(found[0].relation_type, RelationType::PartOf);
        assert_eq!(found[0].weight, cfg.part_of_weight);
    }

    #[test]
    fn passive_form_reverses_direction() {
        let cfg = RelationsConfig::default();
        let found = detect(
            "A Fair Value Gap is caused by a Liquidity Sweep.",
            &dict(),
            &cfg,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].from_term, "Liquidity Sweep");
        assert_eq!(found[0].to_term, "Fair Value Gap");
        assert_eq!(found[0].relation_type, RelationType::Causes);
    }

    #[test]
    fn sentence_with_one_term_yields_nothing() {
        let found = detect(
            "The Fair Value Gap stayed open all week.",
            &dict(),
            &RelationsConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn no_self_loops_from_alias_mentions() {
        let found = detect(
            "A Fair Value Gap is part of every FVG strategy.",
            &dict(),
            &RelationsConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn unrelated_terms_in_one_sentence_yield_nothing() {
        let found = detect(
            "Fair Value Gap and Liquidity Sweep both appear on charts.",
            &dict(),
            &RelationsConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn sentence_split_handles_terminators() {
        let parts = split_sentences("One. Two! Three? Four");
        assert_eq!(parts, vec!["One.", "Two!", "Three?", "Four"]);
    }
}
