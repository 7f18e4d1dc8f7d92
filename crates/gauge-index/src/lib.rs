//! Nearest-neighbor search over stored change embeddings.
//!
//! Brute-force cosine scan behind the [`VectorIndex`] trait. At the entry
//! counts this system holds the full scan is faster than maintaining an
//! approximate structure, and it returns exact results.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use gauge_core::{Embedding, IndexEntry, MetadataValue, SCHEMA_VERSION, SimilarityMatch};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode index snapshot: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("index snapshot has schema version {found}, this build reads up to {supported}")]
    SchemaVersion { found: u32, supported: u32 },
}

/// Query-time knobs. `top_k` bounds result count, `min_similarity` floors
/// relevance; matches below the floor are dropped, not padded.
#[derive(Debug, Clone, Copy)]
pub struct QueryParams {
    pub top_k: usize,
    pub min_similarity: f32,
}

/// Retention caps applied on insert. `max_age_secs == 0` disables the age
/// cap; `max_entries` always applies, oldest entries dropped first.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    pub max_age_secs: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_age_secs: 0,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts or overwrites the entry keyed by its embedding `source_id`.
    /// Re-inserting the same id replaces the previous entry.
    async fn insert(&self, entry: IndexEntry);

    /// Top matches by cosine similarity, best first. An empty index or a
    /// floor nothing clears yields an empty vec, never an error.
    async fn query(&self, embedding: &Embedding, params: QueryParams) -> Vec<SimilarityMatch>;

    async fn remove(&self, source_id: &str) -> bool;

    async fn len(&self) -> usize;
}

pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
    retention: RetentionPolicy,
}

impl InMemoryVectorIndex {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub async fn load_snapshot(
        path: impl AsRef<Path>,
        retention: RetentionPolicy,
    ) -> Result<Self, IndexError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: IndexSnapshot = serde_json::from_str(&raw)?;
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(IndexError::SchemaVersion {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut entries = HashMap::with_capacity(snapshot.entries.len());
        for entry in snapshot.entries {
            entries.insert(entry.embedding.source_id.clone(), entry);
        }

        Ok(Self {
            entries: RwLock::new(entries),
            retention,
        })
    }

    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let snapshot = {
            let entries = self.entries.read().await;
            let mut ordered: Vec<IndexEntry> = entries.values().cloned().collect();
            ordered.sort_by(|a, b| a.embedding.source_id.cmp(&b.embedding.source_id));
            IndexSnapshot {
                schema_version: SCHEMA_VERSION,
                entries: ordered,
            }
        };

        let encoded = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, encoded).await?;
        Ok(())
    }

    fn apply_retention(&self, entries: &mut HashMap<String, IndexEntry>, now: i64) {
        if self.retention.max_age_secs > 0 {
            let cutoff = now - self.retention.max_age_secs;
            entries.retain(|_, entry| entry.embedding.created_at >= cutoff);
        }

        while entries.len() > self.retention.max_entries.max(1) {
            let oldest = entries
                .values()
                .min_by(|a, b| {
                    a.embedding
                        .created_at
                        .cmp(&b.embedding.created_at)
                        .then_with(|| a.embedding.source_id.cmp(&b.embedding.source_id))
                })
                .map(|entry| entry.embedding.source_id.clone());
            match oldest {
                Some(source_id) => {
                    tracing::debug!(%source_id, "evicting oldest index entry past capacity");
                    entries.remove(&source_id);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(&self, entry: IndexEntry) {
        let now = entry.embedding.created_at;
        let mut entries = self.entries.write().await;
        entries.insert(entry.embedding.source_id.clone(), entry);
        self.apply_retention(&mut entries, now);
    }

    async fn query(&self, embedding: &Embedding, params: QueryParams) -> Vec<SimilarityMatch> {
        if params.top_k == 0 {
            return Vec::new();
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &IndexEntry)> = entries
            .values()
            .map(|entry| {
                (
                    cosine_similarity(&embedding.vector, &entry.embedding.vector),
                    entry,
                )
            })
            .filter(|(similarity, _)| *similarity >= params.min_similarity)
            .collect();

        // Deterministic order: similarity desc, then recency, then id.
        scored.sort_by(|(sim_a, entry_a), (sim_b, entry_b)| {
            sim_b
                .partial_cmp(sim_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| entry_b.embedding.created_at.cmp(&entry_a.embedding.created_at))
                .then_with(|| entry_a.embedding.source_id.cmp(&entry_b.embedding.source_id))
        });

        scored
            .into_iter()
            .take(params.top_k)
            .map(|(similarity, entry)| SimilarityMatch {
                source_id: entry.embedding.source_id.clone(),
                // Reported similarity is [0,1]; opposite-direction vectors
                // are already below any sensible floor.
                similarity: similarity.clamp(0.0, 1.0),
                metadata: entry.metadata.clone(),
            })
            .collect()
    }

    async fn remove(&self, source_id: &str) -> bool {
        self.entries.write().await.remove(source_id).is_some()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    schema_version: u32,
    entries: Vec<IndexEntry>,
}

/// Cosine similarity in [-1, 1]. Mismatched dimensions and zero vectors
/// score 0.0 so they can never outrank a real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn metadata_number(metadata: &BTreeMap<String, MetadataValue>, key: &str) -> Option<f64> {
    match metadata.get(key)? {
        MetadataValue::Number(value) => Some(*value),
        MetadataValue::Text(_) => None,
    }
}
