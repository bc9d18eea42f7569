//! Ingestion pipeline orchestration.
//!
//! Composes extraction → normalization → section detection → chunking →
//! embedding → vector upsert → metadata write as one logical operation per
//! document. Metadata writes happen in a single transaction; vectors are
//! written first and deleted again (best effort) if that transaction fails,
//! so a failed ingest leaves no partial policy or chunk rows behind.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_many, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::extract::extract;
use crate::models::{Policy, PolicyChunk, PolicyStatus};
use crate::normalize::normalize;
use crate::policies;
use crate::sections::detect_sections;
use crate::vector::{PointPayload, VectorPoint, VectorStore};

/// Caller-supplied attributes for a new policy version.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub name: String,
    pub version: String,
    pub effective_from: chrono::NaiveDate,
    pub effective_to: Option<chrono::NaiveDate>,
    pub uploaded_by: Option<String>,
    /// e.g. `{"topic": ["falls"], "roles": ["support_worker"]}`.
    pub tags: Option<serde_json::Value>,
    /// Storage path for the original file; defaulted when absent.
    pub file_path: Option<String>,
}

/// The ingestion pipeline with its injected collaborators.
///
/// Construct once at process start and reuse; each call owns its own data
/// and there is no internal fan-out.
pub struct IngestionPipeline<'a> {
    embeddings: &'a dyn EmbeddingProvider,
    vectors: &'a dyn VectorStore,
    pool: &'a SqlitePool,
    chunking: ChunkingConfig,
    embed_batch_size: usize,
}

impl<'a> IngestionPipeline<'a> {
    pub fn new(
        embeddings: &'a dyn EmbeddingProvider,
        vectors: &'a dyn VectorStore,
        pool: &'a SqlitePool,
        chunking: ChunkingConfig,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            pool,
            chunking,
            embed_batch_size,
        }
    }

    /// Ingest a policy document. Returns the created policy and the number
    /// of chunks persisted.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        content_type: &str,
        opts: IngestOptions,
    ) -> Result<(Policy, usize)> {
        tracing::info!(name = %opts.name, version = %opts.version, "starting policy ingestion");

        let extracted = extract(bytes, content_type)?;
        if extracted.full_text.trim().is_empty() {
            return Err(Error::EmptyDocument);
        }

        let cleaned = normalize(&extracted.full_text);
        let sections = detect_sections(&cleaned);
        let chunks = chunk_text(
            &cleaned,
            &sections,
            self.chunking.target_size,
            self.chunking.overlap,
        );
        if chunks.is_empty() {
            return Err(Error::NoChunks);
        }

        let chunk_texts: Vec<String> = chunks.iter().map(|(text, _)| text.clone()).collect();
        let vectors = embed_many(self.embeddings, &chunk_texts, self.embed_batch_size).await?;
        if vectors.len() != chunks.len() {
            return Err(Error::CardinalityMismatch {
                got: vectors.len(),
                expected: chunks.len(),
            });
        }

        let policy = Policy {
            id: Uuid::new_v4().to_string(),
            name: opts.name.clone(),
            version: opts.version.clone(),
            file_path: opts
                .file_path
                .unwrap_or_else(|| format!("policies/{}_{}.pdf", opts.name, opts.version)),
            uploaded_by: opts.uploaded_by,
            effective_from: opts.effective_from,
            effective_to: opts.effective_to,
            status: PolicyStatus::Active,
            tags: opts.tags.unwrap_or_else(|| serde_json::json!({})),
            dedup_hash: dedup_hash(bytes),
        };

        // Fresh unique keys, assigned once and never reused.
        let vector_keys: Vec<String> = chunks.iter().map(|_| Uuid::new_v4().to_string()).collect();

        let points: Vec<VectorPoint> = chunks
            .iter()
            .zip(vectors)
            .zip(&vector_keys)
            .map(|(((text, meta), vector), key)| VectorPoint {
                key: key.clone(),
                vector,
                payload: PointPayload {
                    policy_id: policy.id.clone(),
                    policy_name: policy.name.clone(),
                    policy_version: policy.version.clone(),
                    chunk_text: text.clone(),
                    chunk_index: meta.chunk_index as i64,
                    section_name: meta.section_name.clone(),
                    word_count: meta.word_count as i64,
                    char_count: meta.char_count as i64,
                },
            })
            .collect();

        // Vectors go in first; if the metadata transaction below fails we
        // delete them again so the two stores cannot drift apart.
        self.vectors.upsert(points).await?;

        match self.write_metadata(&policy, &chunks, &vector_keys).await {
            Ok(()) => {}
            Err(e) => {
                if let Err(cleanup) = self.vectors.delete_policy(&policy.id).await {
                    tracing::warn!(policy_id = %policy.id, error = %cleanup,
                        "failed to clean up vectors after metadata rollback");
                }
                return Err(e);
            }
        }

        tracing::info!(
            policy_id = %policy.id,
            chunks = chunks.len(),
            pages = extracted.page_count,
            "policy ingestion complete"
        );

        Ok((policy, chunks.len()))
    }

    async fn write_metadata(
        &self,
        policy: &Policy,
        chunks: &[(String, crate::models::ChunkMetadata)],
        vector_keys: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        policies::insert_policy(&mut *tx, policy).await?;

        for ((text, meta), key) in chunks.iter().zip(vector_keys) {
            let chunk = PolicyChunk {
                id: Uuid::new_v4().to_string(),
                policy_id: policy.id.clone(),
                chunk_index: meta.chunk_index as i64,
                text: text.clone(),
                section_name: meta.section_name.clone(),
                vector_key: key.clone(),
                word_count: meta.word_count as i64,
                char_count: meta.char_count as i64,
                page_number: None,
            };
            policies::insert_chunk(&mut *tx, &chunk).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Replace an active policy with a new version.
    ///
    /// The prior policy is marked inactive with its validity window closed
    /// at the new version's `effective_from`, its vectors are removed, and
    /// the new version goes through the standard ingest. Prior chunk rows
    /// are retained for audit history.
    pub async fn update(
        &self,
        old_policy_id: &str,
        bytes: &[u8],
        content_type: &str,
        mut opts: IngestOptions,
    ) -> Result<(Policy, usize)> {
        let old = policies::require_policy(self.pool, old_policy_id).await?;

        tracing::info!(
            policy_id = %old.id,
            old_version = %old.version,
            new_version = %opts.version,
            "updating policy"
        );

        policies::set_status(
            self.pool,
            &old.id,
            PolicyStatus::Inactive,
            Some(opts.effective_from),
        )
        .await?;
        self.vectors.delete_policy(&old.id).await?;

        opts.name = old.name.clone();
        if opts.tags.is_none() {
            opts.tags = Some(old.tags.clone());
        }

        self.ingest(bytes, content_type, opts).await
    }

    /// Soft-delete a policy: mark it archived and drop its vectors. Chunk
    /// rows are retained.
    pub async fn archive(&self, policy_id: &str) -> Result<()> {
        let policy = policies::require_policy(self.pool, policy_id).await?;

        policies::set_status(self.pool, &policy.id, PolicyStatus::Archived, None).await?;
        self.vectors.delete_policy(&policy.id).await?;

        tracing::info!(policy_id = %policy.id, name = %policy.name, "policy archived");
        Ok(())
    }
}

fn dedup_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
