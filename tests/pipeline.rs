//! End-to-end pipeline tests: ingest real (plain-text) policy documents
//! into a temporary SQLite database and in-memory vector store, then drive
//! retrieval and answer composition with stub providers.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::SqlitePool;
use tempfile::TempDir;

use policy_harness::answer::{
    AnswerComposer, AnswerEvent, Asker, ERROR_ANSWER, NO_MATCH_ANSWER,
};
use policy_harness::audit::{self, SqliteAuditSink};
use policy_harness::config::{ChunkingConfig, GenerationConfig, RetrievalConfig};
use policy_harness::embedding::EmbeddingProvider;
use policy_harness::error::{Error, Result};
use policy_harness::extract::MIME_TEXT;
use policy_harness::generation::GenerationProvider;
use policy_harness::ingest::{IngestOptions, IngestionPipeline};
use policy_harness::models::{Confidence, PolicyStatus};
use policy_harness::retrieval::RetrievalEngine;
use policy_harness::vector::memory::MemoryVectorStore;
use policy_harness::{db, migrate, policies};

/// Maps every text to the same unit vector, so every stored chunk matches
/// every query with similarity 1.0.
struct StubEmbeddings;

#[async_trait]
impl EmbeddingProvider for StubEmbeddings {
    fn model_name(&self) -> &str {
        "stub"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0]).collect())
    }
}

/// Counts calls and returns a fixed grounded answer.
struct StubGeneration {
    calls: AtomicUsize,
}

impl StubGeneration {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GenerationProvider for StubGeneration {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Wear gloves and wash hands before assisting. [Source 1]".to_string())
    }

    async fn generate_stream(
        &self,
        _: &str,
        _: &str,
        _: f32,
        _: u32,
    ) -> Result<BoxStream<'_, Result<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fragments = vec![
            Ok("Wear gloves ".to_string()),
            Ok("and wash hands. [Source 1]".to_string()),
        ];
        Ok(futures::stream::iter(fragments).boxed())
    }
}

/// Always fails, blocking and streaming alike.
struct FailingGeneration;

#[async_trait]
impl GenerationProvider for FailingGeneration {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _: &str, _: &str, _: f32, _: u32) -> Result<String> {
        Err(Error::Generation("provider unavailable".to_string()))
    }

    async fn generate_stream(
        &self,
        _: &str,
        _: &str,
        _: f32,
        _: u32,
    ) -> Result<BoxStream<'_, Result<String>>> {
        Err(Error::Generation("provider unavailable".to_string()))
    }
}

async fn test_pool(dir: &TempDir) -> SqlitePool {
    let pool = db::connect(&dir.path().join("ph.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

/// Three sections sized so default chunking (800/100) yields 2 + 1 + 2
/// chunks.
fn fire_safety_text() -> String {
    let mut text = String::new();
    text.push_str("1. Evacuation Procedures\n");
    text.push_str(&"When the alarm sounds, support workers must assist participants to the nearest marked exit and assemble at the designated meeting point. ".repeat(8));
    text.push_str("\n\n2. Fire Equipment\n");
    text.push_str(&"Extinguishers are checked monthly and must never be blocked by furniture or equipment. Report missing or discharged extinguishers immediately. ".repeat(5));
    text.push_str("\n\n3. Reporting Obligations\n");
    text.push_str(&"All fire incidents, including false alarms, must be reported to the site coordinator within one hour and logged in the incident register. ".repeat(8));
    text
}

fn opts(name: &str, version: &str) -> IngestOptions {
    IngestOptions {
        name: name.to_string(),
        version: version.to_string(),
        effective_from: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        effective_to: None,
        uploaded_by: Some("coordinator".to_string()),
        tags: None,
        file_path: None,
    }
}

fn asker() -> Asker {
    Asker {
        user_id: "w-42".to_string(),
        user_role: "support_worker".to_string(),
        service_id: Some("day-program".to_string()),
    }
}

#[tokio::test]
async fn ingest_persists_policy_chunks_and_vectors() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);

    let (policy, chunk_count) = pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    assert_eq!(chunk_count, 5);
    assert_eq!(policy.status, PolicyStatus::Active);
    assert_eq!(
        policies::chunk_count(&pool, &policy.id).await.unwrap(),
        chunk_count as i64
    );
    assert_eq!(vectors.len(), chunk_count);

    // Chunk rows are contiguous from zero and carry unique vector keys.
    let chunks = policies::chunks_for_policy(&pool, &policy.id).await.unwrap();
    let mut keys: Vec<&str> = chunks.iter().map(|c| c.vector_key.as_str()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
        assert!(chunk.char_count >= 100);
    }

    // Section names survived into the chunk rows.
    assert!(chunks
        .iter()
        .any(|c| c.section_name.as_deref() == Some("1. Evacuation Procedures")));
}

#[tokio::test]
async fn ingest_rejects_empty_document() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);

    let err = pipeline
        .ingest(b"   \n  ", MIME_TEXT, opts("Empty", "1.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyDocument));
    assert_eq!(vectors.len(), 0);
}

#[tokio::test]
async fn update_deactivates_prior_version_and_replaces_vectors() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);

    let (v1, _) = pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    let mut new_opts = opts("ignored", "2.0");
    new_opts.effective_from = chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let (v2, v2_chunks) = pipeline
        .update(&v1.id, fire_safety_text().as_bytes(), MIME_TEXT, new_opts)
        .await
        .unwrap();

    // Name is inherited; the prior version is closed out.
    assert_eq!(v2.name, "Fire Safety");
    let old = policies::require_policy(&pool, &v1.id).await.unwrap();
    assert_eq!(old.status, PolicyStatus::Inactive);
    assert_eq!(
        old.effective_to,
        chrono::NaiveDate::from_ymd_opt(2025, 6, 1)
    );

    // Only the new version is searchable.
    assert_eq!(vectors.len(), v2_chunks);
    let active = policies::active_policy_ids(&pool).await.unwrap();
    assert_eq!(active, vec![v2.id.clone()]);

    let engine = RetrievalEngine::new(&embeddings, &vectors, &pool);
    let retrieved = engine.retrieve("extinguishers", 10, 0.5, true).await.unwrap();
    assert!(!retrieved.is_empty());
    assert!(retrieved.iter().all(|c| c.policy_id == v2.id));
    assert!(retrieved.iter().all(|c| c.policy_version == "2.0"));
}

#[tokio::test]
async fn archive_removes_policy_from_retrieval() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);

    let (policy, _) = pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    pipeline.archive(&policy.id).await.unwrap();

    let archived = policies::require_policy(&pool, &policy.id).await.unwrap();
    assert_eq!(archived.status, PolicyStatus::Archived);
    assert!(vectors.is_empty());

    // Chunk rows are kept for history.
    assert!(policies::chunk_count(&pool, &policy.id).await.unwrap() > 0);

    let engine = RetrievalEngine::new(&embeddings, &vectors, &pool);
    let retrieved = engine.retrieve("evacuation", 10, 0.5, true).await.unwrap();
    assert!(retrieved.is_empty());
}

#[tokio::test]
async fn answer_without_matching_policies_escalates_without_generation() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let generation = StubGeneration::new();
    let audit_sink = SqliteAuditSink::new(pool.clone());

    let composer = AnswerComposer::new(
        &embeddings,
        &vectors,
        &generation,
        &audit_sink,
        &pool,
        RetrievalConfig::default(),
        GenerationConfig::default(),
    );

    let answer = composer
        .answer("What is the overtime policy?", &asker())
        .await
        .unwrap();

    assert_eq!(answer.answer, NO_MATCH_ANSWER);
    assert_eq!(answer.confidence, Confidence::None);
    assert_eq!(answer.chunks_retrieved, 0);
    assert!(answer.sources.is_empty());
    assert_eq!(generation.calls.load(Ordering::SeqCst), 0);

    // The escalation is still audited.
    let logs = audit::logs_for_user(&pool, "w-42", 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].answer, NO_MATCH_ANSWER);
    assert_eq!(logs[0].confidence, Some(Confidence::None));
}

#[tokio::test]
async fn answer_grounded_in_ingested_policy() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);
    pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    let generation = StubGeneration::new();
    let audit_sink = SqliteAuditSink::new(pool.clone());
    let composer = AnswerComposer::new(
        &embeddings,
        &vectors,
        &generation,
        &audit_sink,
        &pool,
        RetrievalConfig::default(),
        GenerationConfig::default(),
    );

    let answer = composer
        .answer("What do I do when the fire alarm sounds?", &asker())
        .await
        .unwrap();

    assert_eq!(generation.calls.load(Ordering::SeqCst), 1);
    assert!(answer.answer.contains("[Source 1]"));
    // Stub similarity is 1.0 for every chunk.
    assert_eq!(answer.confidence, Confidence::High);
    assert!(answer.chunks_retrieved > 0);
    assert_eq!(answer.sources.len(), answer.chunks_retrieved);
    assert!(answer.sources.iter().all(|s| s.policy == "Fire Safety"));

    let logs = audit::logs_for_service(&pool, "day-program", 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].sources.len(), answer.sources.len());
}

#[tokio::test]
async fn generation_failure_degrades_to_error_answer() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);
    pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    let generation = FailingGeneration;
    let audit_sink = SqliteAuditSink::new(pool.clone());
    let composer = AnswerComposer::new(
        &embeddings,
        &vectors,
        &generation,
        &audit_sink,
        &pool,
        RetrievalConfig::default(),
        GenerationConfig::default(),
    );

    let answer = composer
        .answer("What do I do when the fire alarm sounds?", &asker())
        .await
        .unwrap();

    assert_eq!(answer.answer, ERROR_ANSWER);
    assert_eq!(answer.confidence, Confidence::Error);
    // Retrieval worked, so the citations are still attached.
    assert!(answer.chunks_retrieved > 0);
    assert!(!answer.sources.is_empty());
}

#[tokio::test]
async fn streaming_answer_yields_fragments_then_summary() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);
    pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    let generation = StubGeneration::new();
    let audit_sink = SqliteAuditSink::new(pool.clone());
    let composer = AnswerComposer::new(
        &embeddings,
        &vectors,
        &generation,
        &audit_sink,
        &pool,
        RetrievalConfig::default(),
        GenerationConfig::default(),
    );

    let who = asker();
    let mut events = composer
        .answer_stream("What do I do when the fire alarm sounds?", &who)
        .await
        .unwrap();

    let mut text = String::new();
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event.unwrap() {
            AnswerEvent::Fragment(fragment) => {
                assert!(summary.is_none(), "fragment after summary");
                text.push_str(&fragment);
            }
            AnswerEvent::Summary(s) => {
                assert!(summary.is_none(), "duplicate summary");
                summary = Some(s);
            }
        }
    }

    assert_eq!(text, "Wear gloves and wash hands. [Source 1]");
    let summary = summary.expect("stream ended without summary");
    assert_eq!(summary.confidence, Confidence::High);
    assert!(summary.chunks_retrieved > 0);

    // The full concatenated answer is what lands in the audit trail.
    let logs = audit::logs_for_user(&pool, "w-42", 10, 0).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].answer, text);
}

#[tokio::test]
async fn streaming_failure_emits_error_fallback() {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let embeddings = StubEmbeddings;
    let vectors = MemoryVectorStore::new();
    let pipeline =
        IngestionPipeline::new(&embeddings, &vectors, &pool, ChunkingConfig::default(), 100);
    pipeline
        .ingest(fire_safety_text().as_bytes(), MIME_TEXT, opts("Fire Safety", "1.0"))
        .await
        .unwrap();

    let generation = FailingGeneration;
    let audit_sink = SqliteAuditSink::new(pool.clone());
    let composer = AnswerComposer::new(
        &embeddings,
        &vectors,
        &generation,
        &audit_sink,
        &pool,
        RetrievalConfig::default(),
        GenerationConfig::default(),
    );

    let who = asker();
    let mut events = composer
        .answer_stream("What do I do when the fire alarm sounds?", &who)
        .await
        .unwrap();

    let mut fragments = Vec::new();
    let mut summary = None;
    while let Some(event) = events.next().await {
        match event.unwrap() {
            AnswerEvent::Fragment(f) => fragments.push(f),
            AnswerEvent::Summary(s) => summary = Some(s),
        }
    }

    assert_eq!(fragments, vec![ERROR_ANSWER.to_string()]);
    assert_eq!(summary.unwrap().confidence, Confidence::Error);
}
