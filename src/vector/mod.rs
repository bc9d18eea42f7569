//! Vector store abstraction for policy chunk embeddings.
//!
//! The [`VectorStore`] trait defines the three operations the pipeline
//! needs: batched upsert, filtered similarity search, and delete-by-policy.
//! Payloads carry enough metadata to rebuild a retrieved chunk without a
//! metadata-store join.
//!
//! Backends: [`memory::MemoryVectorStore`] (brute-force cosine, used in
//! tests and small deployments) and [`qdrant::QdrantStore`] (REST client).

pub mod memory;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload stored next to each vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub policy_id: String,
    pub policy_name: String,
    pub policy_version: String,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub section_name: Option<String>,
    pub word_count: i64,
    pub char_count: i64,
}

/// A (key, vector, payload) triple to upsert.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// Globally unique, immutable once assigned.
    pub key: String,
    pub vector: Vec<f32>,
    pub payload: PointPayload,
}

/// A raw similarity hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub key: String,
    /// Cosine similarity in [0, 1].
    pub score: f32,
    pub payload: PointPayload,
}

/// Abstract vector index. Shared and externally synchronized; the pipeline
/// never assumes exclusive access.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace points by key.
    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<()>;

    /// Cosine similarity search. Results below `score_threshold` are never
    /// returned; `policy_ids`, when given, restricts hits to those owners.
    /// Ordered by descending score.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        score_threshold: f32,
        policy_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>>;

    /// Remove all vectors owned by a policy.
    async fn delete_policy(&self, policy_id: &str) -> Result<()>;
}
