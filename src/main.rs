//! # Policy Harness CLI (`ph`)
//!
//! The `ph` binary is the operational interface for Policy Harness. It
//! provides commands for database initialization, policy ingestion and
//! lifecycle management, question answering, and audit log review.
//!
//! ## Usage
//!
//! ```bash
//! ph --config ./config/ph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ph init` | Create the SQLite database and run schema migrations |
//! | `ph ingest <file>` | Ingest a new policy document |
//! | `ph update <id> <file>` | Replace a policy with a new version |
//! | `ph archive <id>` | Archive a policy and drop its vectors |
//! | `ph list` | List policies, optionally filtered by status |
//! | `ph ask "<question>"` | Answer a question against active policies |
//! | `ph logs` | Show recent query log entries |

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;

use policy_harness::answer::{AnswerComposer, AnswerEvent, Asker};
use policy_harness::audit::{self, SqliteAuditSink};
use policy_harness::config::{self, Config};
use policy_harness::embedding::{EmbeddingProvider, OpenAiEmbeddings};
use policy_harness::extract::{MIME_DOCX, MIME_PDF, MIME_TEXT};
use policy_harness::generation::{GenerationProvider, OpenAiGeneration};
use policy_harness::ingest::{IngestOptions, IngestionPipeline};
use policy_harness::models::PolicyStatus;
use policy_harness::vector::memory::MemoryVectorStore;
use policy_harness::vector::qdrant::QdrantStore;
use policy_harness::vector::VectorStore;
use policy_harness::{db, migrate, policies};

/// Policy Harness CLI — ingestion and grounded question answering over
/// versioned policy documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ph.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ph",
    about = "Policy Harness — grounded policy question answering for support workers",
    version,
    long_about = "Policy Harness ingests versioned policy documents (PDF, DOCX), chunks and \
    embeds them, and answers natural-language questions with cited, confidence-labelled \
    answers grounded in the active policy corpus."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (policies,
    /// policy_chunks, query_logs). Idempotent.
    Init,

    /// Ingest a new policy document.
    ///
    /// Extracts text, chunks it by section, embeds the chunks, and stores
    /// vectors and metadata. The new policy becomes active immediately.
    Ingest {
        /// Path to the policy file (.pdf, .docx, or .txt).
        file: PathBuf,

        /// Policy name, e.g. "Medication Management".
        #[arg(long)]
        name: String,

        /// Version label, e.g. "2.1".
        #[arg(long)]
        version: String,

        /// Date this version takes effect (YYYY-MM-DD).
        #[arg(long)]
        effective_from: chrono::NaiveDate,

        /// Date this version stops applying (YYYY-MM-DD).
        #[arg(long)]
        effective_to: Option<chrono::NaiveDate>,

        /// Identifier of the person uploading.
        #[arg(long)]
        uploaded_by: Option<String>,

        /// Tags as a JSON object, e.g. '{"topic": ["falls"]}'.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Replace an existing policy with a new version.
    ///
    /// The prior version is marked inactive and its vectors removed; the
    /// new version goes through the standard ingest under the same name.
    Update {
        /// Id of the policy being superseded.
        policy_id: String,

        /// Path to the new policy file (.pdf, .docx, or .txt).
        file: PathBuf,

        /// New version label.
        #[arg(long)]
        version: String,

        /// Date the new version takes effect (YYYY-MM-DD).
        #[arg(long)]
        effective_from: chrono::NaiveDate,

        /// Identifier of the person uploading.
        #[arg(long)]
        uploaded_by: Option<String>,

        /// Tags as a JSON object; defaults to the prior version's tags.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Archive a policy.
    ///
    /// Marks it archived and removes its vectors from the index. Chunk
    /// rows are retained for audit history.
    Archive {
        /// Id of the policy to archive.
        policy_id: String,
    },

    /// List policies.
    List {
        /// Filter by status: active, inactive, or archived.
        #[arg(long)]
        status: Option<String>,
    },

    /// Answer a question against the active policy corpus.
    Ask {
        /// The question to answer.
        question: String,

        /// Identifier of the person asking.
        #[arg(long, default_value = "cli")]
        user: String,

        /// Role of the person asking.
        #[arg(long, default_value = "support_worker")]
        role: String,

        /// Service the question relates to, if any.
        #[arg(long)]
        service: Option<String>,

        /// Stream the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Show recent query log entries.
    Logs {
        /// Filter by the user who asked.
        #[arg(long)]
        user: Option<String>,

        /// Filter by service.
        #[arg(long)]
        service: Option<String>,

        /// Maximum number of entries to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Number of entries to skip.
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("policy_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            name,
            version,
            effective_from,
            effective_to,
            uploaded_by,
            tags,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let embeddings = build_embeddings(&cfg)?;
            let vectors = build_vectors(&cfg, embeddings.dims()).await?;
            let pipeline = IngestionPipeline::new(
                embeddings.as_ref(),
                vectors.as_ref(),
                &pool,
                cfg.chunking.clone(),
                cfg.embedding.batch_size,
            );

            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let opts = IngestOptions {
                name,
                version,
                effective_from,
                effective_to,
                uploaded_by,
                tags: parse_tags(tags)?,
                file_path: Some(file.display().to_string()),
            };

            let (policy, chunks) = pipeline
                .ingest(&bytes, content_type_for(&file)?, opts)
                .await?;
            println!(
                "Ingested {} v{} ({} chunks), id {}",
                policy.name, policy.version, chunks, policy.id
            );
        }
        Commands::Update {
            policy_id,
            file,
            version,
            effective_from,
            uploaded_by,
            tags,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let embeddings = build_embeddings(&cfg)?;
            let vectors = build_vectors(&cfg, embeddings.dims()).await?;
            let pipeline = IngestionPipeline::new(
                embeddings.as_ref(),
                vectors.as_ref(),
                &pool,
                cfg.chunking.clone(),
                cfg.embedding.batch_size,
            );

            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let opts = IngestOptions {
                name: String::new(), // inherited from the prior version
                version,
                effective_from,
                effective_to: None,
                uploaded_by,
                tags: parse_tags(tags)?,
                file_path: Some(file.display().to_string()),
            };

            let (policy, chunks) = pipeline
                .update(&policy_id, &bytes, content_type_for(&file)?, opts)
                .await?;
            println!(
                "Updated {} to v{} ({} chunks), new id {}",
                policy.name, policy.version, chunks, policy.id
            );
        }
        Commands::Archive { policy_id } => {
            let pool = db::connect(&cfg.db.path).await?;
            let embeddings = build_embeddings(&cfg)?;
            let vectors = build_vectors(&cfg, embeddings.dims()).await?;
            let pipeline = IngestionPipeline::new(
                embeddings.as_ref(),
                vectors.as_ref(),
                &pool,
                cfg.chunking.clone(),
                cfg.embedding.batch_size,
            );

            pipeline.archive(&policy_id).await?;
            println!("Archived policy {}", policy_id);
        }
        Commands::List { status } => {
            let pool = db::connect(&cfg.db.path).await?;
            let status = status
                .as_deref()
                .map(|s| {
                    PolicyStatus::parse(s)
                        .ok_or_else(|| anyhow::anyhow!("unknown status: {}", s))
                })
                .transpose()?;
            let all = policies::list_policies(&pool, status).await?;
            for policy in &all {
                println!(
                    "{}  {} v{}  [{}]  effective {}{}",
                    policy.id,
                    policy.name,
                    policy.version,
                    policy.status.as_str(),
                    policy.effective_from,
                    policy
                        .effective_to
                        .map(|d| format!(" to {}", d))
                        .unwrap_or_default()
                );
            }
            if all.is_empty() {
                println!("No policies found.");
            }
        }
        Commands::Ask {
            question,
            user,
            role,
            service,
            stream,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let embeddings = build_embeddings(&cfg)?;
            let vectors = build_vectors(&cfg, embeddings.dims()).await?;
            let generation = build_generation(&cfg)?;
            let audit_sink = SqliteAuditSink::new(pool.clone());

            let composer = AnswerComposer::new(
                embeddings.as_ref(),
                vectors.as_ref(),
                generation.as_ref(),
                &audit_sink,
                &pool,
                cfg.retrieval.clone(),
                cfg.generation.clone(),
            );
            let asker = Asker {
                user_id: user,
                user_role: role,
                service_id: service,
            };

            if stream {
                let mut events = composer.answer_stream(&question, &asker).await?;
                while let Some(event) = events.next().await {
                    match event? {
                        AnswerEvent::Fragment(text) => {
                            print!("{}", text);
                            std::io::stdout().flush()?;
                        }
                        AnswerEvent::Summary(summary) => {
                            println!();
                            println!();
                            print_sources(&summary.sources);
                            println!(
                                "Confidence: {} ({} chunks)",
                                summary.confidence.as_str(),
                                summary.chunks_retrieved
                            );
                        }
                    }
                }
            } else {
                let answer = composer.answer(&question, &asker).await?;
                println!("{}", answer.answer);
                println!();
                print_sources(&answer.sources);
                println!(
                    "Confidence: {} ({} chunks)",
                    answer.confidence.as_str(),
                    answer.chunks_retrieved
                );
            }
        }
        Commands::Logs {
            user,
            service,
            limit,
            offset,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let entries = match (user, service) {
                (Some(user), _) => audit::logs_for_user(&pool, &user, limit, offset).await?,
                (None, Some(service)) => {
                    audit::logs_for_service(&pool, &service, limit, offset).await?
                }
                (None, None) => anyhow::bail!("logs requires --user or --service"),
            };
            for entry in &entries {
                println!(
                    "[{}] {} ({}) asked: {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.user_id,
                    entry.user_role,
                    entry.question
                );
                println!(
                    "  -> {} [confidence: {}]",
                    first_line(&entry.answer),
                    entry
                        .confidence
                        .map(|c| c.as_str())
                        .unwrap_or("unknown")
                );
            }
            if entries.is_empty() {
                println!("No log entries found.");
            }
        }
    }

    Ok(())
}

fn build_embeddings(cfg: &Config) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    match cfg.embedding.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbeddings::new(&cfg.embedding)?)),
        "disabled" => anyhow::bail!(
            "this command requires an embedding provider; set [embedding].provider in config"
        ),
        other => anyhow::bail!("unknown embedding provider: {}", other),
    }
}

fn build_generation(cfg: &Config) -> anyhow::Result<Box<dyn GenerationProvider>> {
    match cfg.generation.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGeneration::new(&cfg.generation)?)),
        "disabled" => anyhow::bail!(
            "this command requires a generation provider; set [generation].provider in config"
        ),
        other => anyhow::bail!("unknown generation provider: {}", other),
    }
}

async fn build_vectors(cfg: &Config, dims: usize) -> anyhow::Result<Box<dyn VectorStore>> {
    match cfg.vector.backend.as_str() {
        "memory" => Ok(Box::new(MemoryVectorStore::new())),
        "qdrant" => {
            let store = QdrantStore::new(&cfg.vector)?;
            store.ensure_collection(dims).await?;
            Ok(Box::new(store))
        }
        other => anyhow::bail!("unknown vector backend: {}", other),
    }
}

fn content_type_for(path: &std::path::Path) -> anyhow::Result<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => Ok(MIME_PDF),
        Some("docx") => Ok(MIME_DOCX),
        Some("txt") => Ok(MIME_TEXT),
        _ => anyhow::bail!(
            "cannot determine content type for {} (expected .pdf, .docx, or .txt)",
            path.display()
        ),
    }
}

fn parse_tags(tags: Option<String>) -> anyhow::Result<Option<serde_json::Value>> {
    tags.map(|t| serde_json::from_str(&t).context("tags must be a JSON object"))
        .transpose()
}

fn print_sources(sources: &[policy_harness::models::SourceCitation]) {
    if sources.is_empty() {
        return;
    }
    println!("Sources:");
    for source in sources {
        println!(
            "  - {} v{} ({}) score {:.3}",
            source.policy, source.version, source.section, source.relevance_score
        );
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}
