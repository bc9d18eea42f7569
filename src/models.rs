//! Core data models used throughout Policy Harness.
//!
//! These types represent the policies, chunks, and retrieval results that
//! flow through the ingestion and answering pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a policy document.
///
/// Policies are never physically deleted; `archive` transitions them to
/// `Archived` and removes their vectors from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    Active,
    Inactive,
    Archived,
}

impl PolicyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyStatus::Active => "active",
            PolicyStatus::Inactive => "inactive",
            PolicyStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PolicyStatus::Active),
            "inactive" => Some(PolicyStatus::Inactive),
            "archived" => Some(PolicyStatus::Archived),
            _ => None,
        }
    }
}

/// A versioned policy document stored in SQLite.
///
/// At most one policy per (name, version) is active at a time by
/// convention; the update flow deactivates the prior version before
/// activating a new one.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub version: String,
    pub file_path: String,
    pub uploaded_by: Option<String>,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub status: PolicyStatus,
    /// Free-form tag mapping, e.g. `{"topic": ["falls"], "roles": ["support_worker"]}`.
    pub tags: serde_json::Value,
    pub dedup_hash: String,
}

/// A chunk of a policy's normalized text, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct PolicyChunk {
    pub id: String,
    pub policy_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub section_name: Option<String>,
    /// Key of the vector stored for this chunk. Globally unique and
    /// immutable once assigned.
    pub vector_key: String,
    pub word_count: i64,
    pub char_count: i64,
    pub page_number: Option<i64>,
}

/// A named structural span over a policy's normalized text.
///
/// Transient: produced by the section detector, consumed by the chunker,
/// never persisted. Spans are half-open `[start, end)` and contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// Metadata attached to each emitted chunk by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub section_name: Option<String>,
    pub chunk_index: usize,
    pub word_count: usize,
    pub char_count: usize,
}

/// A chunk returned from retrieval, enriched with its parent policy's
/// name and version. Produced per-query, never persisted.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_text: String,
    pub policy_id: String,
    pub policy_name: String,
    pub policy_version: String,
    pub section_name: Option<String>,
    pub chunk_index: i64,
    /// Cosine similarity in [0, 1].
    pub relevance_score: f32,
    pub vector_key: String,
}

/// Coarse trustworthiness label for a retrieval-grounded answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
    Error,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::None => "none",
            Confidence::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            "none" => Some(Confidence::None),
            "error" => Some(Confidence::Error),
            _ => None,
        }
    }
}

/// A source citation returned alongside an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCitation {
    pub policy: String,
    pub version: String,
    /// Section name, or `"General"` when the chunk had none.
    pub section: String,
    /// Relevance score rounded to 3 decimals.
    pub relevance_score: f64,
}

/// Complete answer for the non-streaming path.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub confidence: Confidence,
    pub chunks_retrieved: usize,
}
