//! In-memory [`VectorStore`] backed by brute-force cosine similarity.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Suitable for
//! tests and small corpora; the similarity scan is linear in the number of
//! stored vectors.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;

use super::{PointPayload, SearchHit, VectorPoint, VectorStore};

struct StoredPoint {
    key: String,
    vector: Vec<f32>,
    payload: PointPayload,
}

/// Brute-force in-process vector index.
pub struct MemoryVectorStore {
    points: RwLock<Vec<StoredPoint>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()> {
        let mut stored = self.points.write().unwrap();
        for p in points {
            stored.retain(|sp| sp.key != p.key);
            stored.push(StoredPoint {
                key: p.key,
                vector: p.vector,
                payload: p.payload,
            });
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
        policy_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.points.read().unwrap();
        let mut hits: Vec<SearchHit> = stored
            .iter()
            .filter(|sp| match policy_ids {
                Some(ids) => ids.iter().any(|id| *id == sp.payload.policy_id),
                None => true,
            })
            .filter_map(|sp| {
                let score = cosine_similarity(query, &sp.vector);
                // The threshold is a hard cutoff, not a ranking signal.
                if score >= score_threshold {
                    Some(SearchHit {
                        key: sp.key.clone(),
                        score,
                        payload: sp.payload.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_policy(&self, policy_id: &str) -> Result<()> {
        let mut stored = self.points.write().unwrap();
        stored.retain(|sp| sp.payload.policy_id != policy_id);
        Ok(())
    }
}
