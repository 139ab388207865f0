//! Dictionary-driven canonical term extraction.
//!
//! The dictionary is external configuration (`data/terms.toml`), not code:
//! each entry names a canonical term, its aliases, classification tags, and
//! the keyword bucket used for relevance scoring. Matching is
//! case-insensitive and longest-match-first: occurrences are claimed
//! greedily left to right with longer names winning at equal positions, so
//! "order block" never also surfaces an embedded "order" match.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::{AssetClass, Category, Difficulty};

/// One curated dictionary entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TermDef {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub category: Category,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub asset_classes: Vec<AssetClass>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl TermDef {
    /// Canonical name plus aliases, longest first.
    fn names_by_length(&self) -> Vec<&str> {
        let mut names: Vec<&str> = std::iter::once(self.canonical.as_str())
            .chain(self.aliases.iter().map(|a| a.as_str()))
            .collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TermDictionary {
    #[serde(rename = "term")]
    pub terms: Vec<TermDef>,
}

/// One definition found in a document.
#[derive(Debug, Clone)]
pub struct TermMatch<'a> {
    pub def: &'a TermDef,
    /// The dictionary name that actually matched (canonical or alias).
    pub matched_name: String,
    pub occurrences: usize,
}

/// A single claimed occurrence of a dictionary name in lowered text.
struct Occurrence<'a> {
    pos: usize,
    def_idx: usize,
    name: &'a str,
}

impl TermDictionary {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read term dictionary: {}", path.display()))?;
        let dict: TermDictionary =
            toml::from_str(&content).with_context(|| "Failed to parse term dictionary")?;
        if dict.terms.is_empty() {
            anyhow::bail!("Term dictionary is empty: {}", path.display());
        }
        Ok(dict)
    }

    /// Every definition present in `text`, ordered by first appearance.
    /// Occurrence counts are per definition across all of its names.
    pub fn matches<'a>(&'a self, text: &str) -> Vec<TermMatch<'a>> {
        let lower = text.to_lowercase();
        let claimed = self.claim_occurrences(&lower);

        let mut out: Vec<TermMatch<'a>> = Vec::new();
        let mut seen: Vec<usize> = Vec::new();
        for occ in &claimed {
            match seen.iter().position(|&i| i == occ.def_idx) {
                Some(slot) => out[slot].occurrences += 1,
                None => {
                    seen.push(occ.def_idx);
                    out.push(TermMatch {
                        def: &self.terms[occ.def_idx],
                        matched_name: occ.name.to_string(),
                        occurrences: 1,
                    });
                }
            }
        }
        out
    }

    /// All definitions occurring in `text` with their first position,
    /// in order of appearance. Used by the relationship detector on
    /// single sentences.
    pub fn terms_in<'a>(&'a self, text: &str) -> Vec<(&'a TermDef, usize)> {
        let lower = text.to_lowercase();
        let claimed = self.claim_occurrences(&lower);

        let mut found: Vec<(&'a TermDef, usize)> = Vec::new();
        for occ in &claimed {
            if !found
                .iter()
                .any(|(def, _)| std::ptr::eq(*def, &self.terms[occ.def_idx]))
            {
                found.push((&self.terms[occ.def_idx], occ.pos));
            }
        }
        found
    }

    /// Word-bounded occurrences of every dictionary name, claimed
    /// greedily left to right. At equal positions the longest name wins;
    /// anything overlapping an already claimed span is dropped.
    fn claim_occurrences<'a>(&'a self, lower: &str) -> Vec<Occurrence<'a>> {
        let mut candidates: Vec<(usize, usize, Occurrence<'a>)> = Vec::new();
        for (def_idx, def) in self.terms.iter().enumerate() {
            for name in def.names_by_length() {
                let lname = name.to_lowercase();
                for pos in word_occurrences(lower, &lname) {
                    candidates.push((pos, lname.len(), Occurrence { pos, def_idx, name }));
                }
            }
        }
        // Position ascending, length descending; stable sort keeps
        // dictionary order for exact ties.
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

        let mut claimed = Vec::new();
        let mut claimed_end = 0usize;
        for (pos, len, occ) in candidates {
            if pos < claimed_end && claimed_end > 0 {
                continue;
            }
            claimed_end = pos + len;
            claimed.push(occ);
        }
        claimed
    }
}

/// All word-bounded, non-overlapping occurrence positions of `needle` in
/// `haystack` (both already lowercased).
fn word_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack
        .match_indices(needle)
        .filter(|(pos, _)| has_word_boundaries(haystack, *pos, needle.len()))
        .map(|(pos, _)| pos)
        .collect()
}

fn has_word_boundaries(haystack: &str, pos: usize, len: usize) -> bool {
    let before_ok = pos == 0
        || haystack[..pos]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
    let after_ok = pos + len >= haystack.len()
        || haystack[pos + len..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
    before_ok && after_ok
}
