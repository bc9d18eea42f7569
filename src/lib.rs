//! # Policy Harness
//!
//! A policy question-answering pipeline for disability support providers.
//!
//! Policy Harness ingests versioned policy documents (PDF, DOCX), chunks
//! and embeds them, and answers natural-language questions from support
//! workers with cited, confidence-labelled answers grounded in the active
//! policy corpus.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │  Documents   │──▶│    Ingestion     │──▶│ SQLite + Vec  │
//! │  PDF/DOCX    │   │ Chunk+Embed      │   │ meta + index  │
//! └──────────────┘   └──────────────────┘   └──────┬────────┘
//!                                                  │
//!                          ┌───────────────────────┤
//!                          ▼                       ▼
//!                    ┌───────────┐          ┌────────────┐
//!                    │ Retrieval │─────────▶│  Composer  │
//!                    │  top-k    │          │ answer+cite│
//!                    └───────────┘          └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF/DOCX text extraction |
//! | [`normalize`] | Extraction-artifact cleanup |
//! | [`sections`] | Structural heading detection |
//! | [`chunk`] | Section-aware sliding-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector store abstraction (memory, Qdrant) |
//! | [`ingest`] | Ingestion pipeline and policy lifecycle |
//! | [`retrieval`] | Similarity retrieval and confidence scoring |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`answer`] | Answer composition with citations |
//! | [`audit`] | Query audit trail |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod audit;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod policies;
pub mod retrieval;
pub mod sections;
pub mod vector;
