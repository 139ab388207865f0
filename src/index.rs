//! In-memory vector index with atomic snapshot replacement.
//!
//! The index serves k-nearest-neighbor lookups (cosine similarity) over
//! all active, indexed concept entries. A rebuild embeds the entry store
//! from scratch, persists vectors and snapshot metadata to SQLite, and
//! only then swaps the in-memory pointer. Readers capture the current
//! [`Snapshot`] Arc once per call and keep using it for the whole call,
//! so a concurrent rebuild is never observed half-built.
//!
//! Exactly one snapshot row is `current` in the database at any time; the
//! flip is the last write of a rebuild.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::config::EmbeddingConfig;
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::IndexSnapshotMeta;
use crate::store;

/// An immutable, fully built index version.
pub struct Snapshot {
    pub meta: IndexSnapshotMeta,
    /// (entry_id, vector), sorted by entry_id.
    vectors: Vec<(String, Vec<f32>)>,
}

impl Snapshot {
    pub fn empty(model: &str, dims: usize) -> Self {
        Snapshot {
            meta: IndexSnapshotMeta {
                version: Uuid::new_v4().to_string(),
                entry_count: 0,
                vector_dimension: dims as i64,
                model: model.to_string(),
                checksum: String::new(),
                built_at: Utc::now().timestamp(),
            },
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Vector stored for one entry in this snapshot, if indexed.
    pub fn vector(&self, entry_id: &str) -> Option<&[f32]> {
        self.vectors
            .binary_search_by(|(id, _)| id.as_str().cmp(entry_id))
            .ok()
            .map(|i| self.vectors[i].1.as_slice())
    }

    /// Top-k entries by cosine similarity, descending; ties break by
    /// entry id ascending for determinism. Never mutates the snapshot.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(String, f64)> {
        let mut scored: Vec<(String, f64)> = self
            .vectors
            .iter()
            .map(|(id, vec)| (id.clone(), cosine_similarity(query, vec) as f64))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

/// Atomically replaceable reference to the currently served snapshot.
pub struct VectorIndex {
    current: RwLock<Arc<Snapshot>>,
}

impl VectorIndex {
    pub fn new(snapshot: Snapshot) -> Self {
        VectorIndex {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Load the current persisted snapshot, or an empty one when the
    /// index has never been built. A model/dimension mismatch between
    /// the stored snapshot and the configured provider is an error: the
    /// vectors cannot be compared and a full rebuild is required.
    pub async fn load_current(pool: &SqlitePool, config: &EmbeddingConfig) -> Result<Self> {
        let provider = embedding::create_provider(config)?;

        let row = sqlx::query(
            "SELECT version, entry_count, vector_dimension, model, checksum, built_at
             FROM index_snapshots WHERE current = 1",
        )
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else {
            return Ok(VectorIndex::new(Snapshot::empty(
                provider.model_name(),
                provider.dims(),
            )));
        };

        let meta = IndexSnapshotMeta {
            version: row.get("version"),
            entry_count: row.get("entry_count"),
            vector_dimension: row.get("vector_dimension"),
            model: row.get("model"),
            checksum: row.get("checksum"),
            built_at: row.get("built_at"),
        };

        if meta.model != provider.model_name() || meta.vector_dimension != provider.dims() as i64 {
            bail!(
                "Index snapshot was built with model '{}' ({} dims) but the configured \
                 provider is '{}' ({} dims). Run `lore rebuild-index`.",
                meta.model,
                meta.vector_dimension,
                provider.model_name(),
                provider.dims()
            );
        }

        let vector_rows = sqlx::query(
            "SELECT entry_id, embedding FROM entry_vectors
             WHERE snapshot_version = ? ORDER BY entry_id",
        )
        .bind(&meta.version)
        .fetch_all(pool)
        .await?;

        let vectors: Vec<(String, Vec<f32>)> = vector_rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (row.get::<String, _>("entry_id"), blob_to_vec(&blob))
            })
            .collect();

        Ok(VectorIndex::new(Snapshot { meta, vectors }))
    }

    /// Capture the currently served snapshot. Callers hold the Arc for
    /// the duration of one logical operation.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().expect("index lock poisoned").clone()
    }

    /// Rebuild the index wholesale from the concept store.
    ///
    /// Embeds every active entry with a non-empty summary, persists the
    /// new snapshot (vectors first, `current` flip last), prunes vectors
    /// of superseded snapshots, and finally swaps the in-memory pointer.
    /// On any failure before the flip the previous snapshot stays
    /// current, in memory and on disk.
    pub async fn rebuild(
        &self,
        pool: &SqlitePool,
        config: &EmbeddingConfig,
    ) -> Result<IndexSnapshotMeta> {
        let provider = embedding::create_provider(config)?;
        let entries = store::active_entries(pool).await?;

        let indexable: Vec<_> = entries
            .into_iter()
            .filter(|e| !e.summary.trim().is_empty())
            .collect();

        let mut vectors: Vec<(String, Vec<f32>)> = Vec::with_capacity(indexable.len());
        for batch in indexable.chunks(config.batch_size.max(1)) {
            let texts: Vec<String> = batch
                .iter()
                .map(|e| format!("{}\n{}", e.summary, e.body))
                .collect();
            let embedded = embedding::embed_texts(config, &texts)
                .await
                .context("Embedding failed during index rebuild")?;
            for (entry, vector) in batch.iter().zip(embedded) {
                vectors.push((entry.id.clone(), vector));
            }
        }
        // Deterministic order for search tie-breaks and checksums.
        vectors.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (id, vector) in &vectors {
            hasher.update(id.as_bytes());
            hasher.update(vec_to_blob(vector));
        }
        let checksum = format!("{:x}", hasher.finalize());

        let meta = IndexSnapshotMeta {
            version: Uuid::new_v4().to_string(),
            entry_count: vectors.len() as i64,
            vector_dimension: provider.dims() as i64,
            model: provider.model_name().to_string(),
            checksum,
            built_at: Utc::now().timestamp(),
        };

        // Persist the full snapshot before it becomes visible.
        let mut tx = pool.begin().await?;
        for (entry_id, vector) in &vectors {
            sqlx::query(
                "INSERT INTO entry_vectors (snapshot_version, entry_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&meta.version)
            .bind(entry_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "INSERT INTO index_snapshots
             (version, entry_count, vector_dimension, model, checksum, built_at, current)
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&meta.version)
        .bind(meta.entry_count)
        .bind(meta.vector_dimension)
        .bind(&meta.model)
        .bind(&meta.checksum)
        .bind(meta.built_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        // The pointer flip is a single transaction: readers of the store
        // see either the old current or the new one, never both or none.
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE index_snapshots SET current = 0 WHERE current = 1")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE index_snapshots SET current = 1 WHERE version = ?")
            .bind(&meta.version)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entry_vectors WHERE snapshot_version != ?")
            .bind(&meta.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let snapshot = Snapshot {
            meta: meta.clone(),
            vectors,
        };
        *self.current.write().expect("index lock poisoned") = Arc::new(snapshot);

        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(entries: &[(&str, Vec<f32>)]) -> Snapshot {
        let mut s = Snapshot::empty("hashgram-v1", entries[0].1.len());
        s.vectors = entries
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect();
        s.vectors.sort_by(|a, b| a.0.cmp(&b.0));
        s.meta.entry_count = s.vectors.len() as i64;
        s
    }

    #[test]
    fn search_orders_by_similarity_desc() {
        let s = snap(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.0, 1.0]),
            ("c", vec![0.7, 0.7]),
        ]);
        let hits = s.search(&[1.0, 0.0], 3);
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!(hits[0].1 >= hits[1].1 && hits[1].1 >= hits[2].1);
    }

    #[test]
    fn search_ties_break_by_id() {
        let s = snap(&[
            ("zeta", vec![1.0, 0.0]),
            ("alpha", vec![1.0, 0.0]),
            ("mid", vec![0.0, 1.0]),
        ]);
        let hits = s.search(&[1.0, 0.0], 2);
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn search_truncates_to_k() {
        let s = snap(&[
            ("a", vec![1.0, 0.0]),
            ("b", vec![0.9, 0.1]),
            ("c", vec![0.8, 0.2]),
        ]);
        assert_eq!(s.search(&[1.0, 0.0], 2).len(), 2);
        assert_eq!(s.search(&[1.0, 0.0], 10).len(), 3);
    }

    #[test]
    fn empty_snapshot_returns_nothing() {
        let s = Snapshot::empty("hashgram-v1", 4);
        assert!(s.search(&[1.0, 0.0, 0.0, 0.0], 5).is_empty());
        assert!(s.is_empty());
    }

    #[test]
    fn captured_snapshot_survives_swap() {
        let index = VectorIndex::new(snap(&[("old", vec![1.0, 0.0])]));
        let captured = index.snapshot();

        let replacement = snap(&[("new", vec![1.0, 0.0])]);
        *index.current.write().unwrap() = Arc::new(replacement);

        // The capture still serves the old version; a fresh capture sees
        // the new one. No reader ever sees a mix.
        assert_eq!(captured.search(&[1.0, 0.0], 1)[0].0, "old");
        assert_eq!(index.snapshot().search(&[1.0, 0.0], 1)[0].0, "new");
    }
}
