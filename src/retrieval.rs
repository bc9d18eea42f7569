//! Similarity retrieval over ingested policy chunks.
//!
//! Embeds the question, restricts the search to eligible policies, applies
//! a hard score threshold, and enriches raw hits with policy metadata. The
//! confidence tier is a pure function of the returned score distribution:
//! a single strong hit is not enough for "high" when the rest of the set is
//! weak, which keeps one lucky match from looking authoritative.

use sqlx::SqlitePool;

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::Result;
use crate::models::{Confidence, RetrievedChunk, SourceCitation};
use crate::policies;
use crate::vector::VectorStore;

/// The retrieval engine with its injected collaborators.
pub struct RetrievalEngine<'a> {
    embeddings: &'a dyn EmbeddingProvider,
    vectors: &'a dyn VectorStore,
    pool: &'a SqlitePool,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(
        embeddings: &'a dyn EmbeddingProvider,
        vectors: &'a dyn VectorStore,
        pool: &'a SqlitePool,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            pool,
        }
    }

    /// Retrieve the most relevant chunks for a question, ordered by
    /// descending similarity.
    ///
    /// With `active_only`, the eligible policy set is resolved first; if it
    /// is empty the search short-circuits to an empty result without
    /// touching the vector store. Hits whose parent policy row cannot be
    /// resolved are skipped with a warning rather than failing the query
    /// (metadata and vectors are externally synchronized and may diverge).
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        score_threshold: f32,
        active_only: bool,
    ) -> Result<Vec<RetrievedChunk>> {
        tracing::info!(question = %truncate(question, 100), "retrieving chunks");

        let query_vector = embed_one(self.embeddings, question).await?;

        let policy_ids: Option<Vec<String>> = if active_only {
            let ids = policies::active_policy_ids(self.pool).await?;
            if ids.is_empty() {
                tracing::warn!("no active policies; skipping similarity search");
                return Ok(Vec::new());
            }
            Some(ids)
        } else {
            None
        };

        let hits = self
            .vectors
            .search(
                &query_vector,
                top_k,
                score_threshold,
                policy_ids.as_deref(),
            )
            .await?;

        let mut retrieved: Vec<RetrievedChunk> = Vec::with_capacity(hits.len());
        for hit in hits {
            let policy = match policies::get_policy(self.pool, &hit.payload.policy_id).await? {
                Some(p) => p,
                None => {
                    tracing::warn!(
                        policy_id = %hit.payload.policy_id,
                        "policy row missing for vector hit; skipping chunk"
                    );
                    continue;
                }
            };

            retrieved.push(RetrievedChunk {
                chunk_text: hit.payload.chunk_text,
                policy_id: policy.id,
                policy_name: policy.name,
                policy_version: policy.version,
                section_name: hit.payload.section_name,
                chunk_index: hit.payload.chunk_index,
                relevance_score: hit.score,
                vector_key: hit.key,
            });
        }

        tracing::info!(count = retrieved.len(), "retrieved chunks");
        Ok(retrieved)
    }
}

/// Confidence tier from the retrieved score distribution.
///
/// Empty set → `None`; max > 0.85 and mean > 0.75 → `High`;
/// max > 0.70 and mean > 0.65 → `Medium`; anything else → `Low`.
pub fn confidence(chunks: &[RetrievedChunk]) -> Confidence {
    if chunks.is_empty() {
        return Confidence::None;
    }

    let sum: f32 = chunks.iter().map(|c| c.relevance_score).sum();
    let mean = sum / chunks.len() as f32;
    let max = chunks
        .iter()
        .map(|c| c.relevance_score)
        .fold(f32::NEG_INFINITY, f32::max);

    if max > 0.85 && mean > 0.75 {
        Confidence::High
    } else if max > 0.70 && mean > 0.65 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Format retrieved chunks into the grounding context block consumed by
/// the generation capability.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return "No relevant policy information found.".to_string();
    }

    let parts: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let section_info = chunk
                .section_name
                .as_deref()
                .map(|s| format!(" - {}", s))
                .unwrap_or_default();
            format!(
                "[Source {}] {} (v{}){}\n{}\n",
                i + 1,
                chunk.policy_name,
                chunk.policy_version,
                section_info,
                chunk.chunk_text
            )
        })
        .collect();

    parts.join("\n---\n\n")
}

/// Format chunks into the source citations returned to the caller.
pub fn format_sources(chunks: &[RetrievedChunk]) -> Vec<SourceCitation> {
    chunks
        .iter()
        .map(|chunk| SourceCitation {
            policy: chunk.policy_name.clone(),
            version: chunk.policy_version.clone(),
            section: chunk
                .section_name
                .clone()
                .unwrap_or_else(|| "General".to_string()),
            relevance_score: round3(chunk.relevance_score),
        })
        .collect()
}

fn round3(score: f32) -> f64 {
    (score as f64 * 1000.0).round() / 1000.0
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_score(score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk_text: "Evacuate calmly via the nearest exit.".to_string(),
            policy_id: "p1".to_string(),
            policy_name: "Fire Safety".to_string(),
            policy_version: "1".to_string(),
            section_name: Some("1. Evacuation".to_string()),
            chunk_index: 0,
            relevance_score: score,
            vector_key: "k1".to_string(),
        }
    }

    #[test]
    fn confidence_empty_is_none() {
        assert_eq!(confidence(&[]), Confidence::None);
    }

    #[test]
    fn confidence_single_strong_hit_is_high() {
        assert_eq!(confidence(&[chunk_with_score(0.9)]), Confidence::High);
    }

    #[test]
    fn confidence_moderate_set_is_medium() {
        let chunks = vec![chunk_with_score(0.72), chunk_with_score(0.68)];
        assert_eq!(confidence(&chunks), Confidence::Medium);
    }

    #[test]
    fn confidence_weak_hit_is_low() {
        assert_eq!(confidence(&[chunk_with_score(0.5)]), Confidence::Low);
    }

    #[test]
    fn confidence_one_strong_hit_among_weak_is_not_high() {
        // Max passes the high bar but the mean does not.
        let chunks = vec![
            chunk_with_score(0.9),
            chunk_with_score(0.4),
            chunk_with_score(0.4),
        ];
        assert_eq!(confidence(&chunks), Confidence::Low);
    }

    #[test]
    fn context_numbers_sources_and_carries_section() {
        let chunks = vec![chunk_with_score(0.8), chunk_with_score(0.7)];
        let context = format_context(&chunks);
        assert!(context.contains("[Source 1] Fire Safety (v1) - 1. Evacuation"));
        assert!(context.contains("[Source 2]"));
        assert!(context.contains("\n---\n"));
    }

    #[test]
    fn context_for_empty_set() {
        assert_eq!(format_context(&[]), "No relevant policy information found.");
    }

    #[test]
    fn sources_round_scores_and_default_section() {
        let mut chunk = chunk_with_score(0.87654);
        chunk.section_name = None;
        let sources = format_sources(&[chunk]);
        assert_eq!(sources[0].section, "General");
        assert!((sources[0].relevance_score - 0.877).abs() < 1e-9);
    }
}
