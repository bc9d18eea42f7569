//! Answer composition.
//!
//! The composer turns a question into a grounded answer: retrieve, format
//! the context, call the generation provider, attach citations and a
//! confidence label, and record the exchange for audit. Failures degrade
//! rather than propagate: no retrievable policy text produces an escalation
//! message, a generation failure produces an error fallback. The caller of
//! [`AnswerComposer::answer`] always gets an `Answer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::SqlitePool;

use crate::audit::{AuditSink, QueryLogEntry};
use crate::config::{GenerationConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::generation::GenerationProvider;
use crate::models::{Answer, Confidence, SourceCitation};
use crate::retrieval::{confidence, format_context, format_sources, RetrievalEngine};
use crate::vector::VectorStore;

/// Returned when retrieval finds no policy text above the relevance
/// threshold. The generation provider is never consulted in that case.
pub const NO_MATCH_ANSWER: &str = "I cannot find this in our current policies. \
Please escalate to your manager or on-call coordinator for guidance.";

/// Returned when the generation provider fails after retries.
pub const ERROR_ANSWER: &str = "I encountered an error processing your question. \
Please contact your manager or on-call coordinator for assistance.";

const SYSTEM_PROMPT: &str = "You are a policy assistant for a disability support service provider. \
Answer questions using ONLY the policy excerpts provided. \
If the excerpts do not contain the answer, say so and direct the worker to escalate. \
Cite the source number for every claim, e.g. [Source 1]. \
Be concise and practical; workers read these answers on shift.";

/// Identity of the person asking, carried into the audit trail.
#[derive(Debug, Clone)]
pub struct Asker {
    pub user_id: String,
    pub user_role: String,
    pub service_id: Option<String>,
}

/// Event emitted on the streaming answer path.
///
/// Zero or more `Fragment`s followed by exactly one terminal `Summary`.
#[derive(Debug, Clone)]
pub enum AnswerEvent {
    /// A piece of answer text, in order.
    Fragment(String),
    /// Terminal metadata for the completed answer.
    Summary(AnswerSummary),
}

#[derive(Debug, Clone)]
pub struct AnswerSummary {
    pub sources: Vec<SourceCitation>,
    pub confidence: Confidence,
    pub chunks_retrieved: usize,
}

/// The answer composer with its injected collaborators.
pub struct AnswerComposer<'a> {
    embeddings: &'a dyn EmbeddingProvider,
    vectors: &'a dyn VectorStore,
    generation: &'a dyn GenerationProvider,
    audit: &'a dyn AuditSink,
    pool: &'a SqlitePool,
    retrieval: RetrievalConfig,
    generation_config: GenerationConfig,
}

impl<'a> AnswerComposer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embeddings: &'a dyn EmbeddingProvider,
        vectors: &'a dyn VectorStore,
        generation: &'a dyn GenerationProvider,
        audit: &'a dyn AuditSink,
        pool: &'a SqlitePool,
        retrieval: RetrievalConfig,
        generation_config: GenerationConfig,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            generation,
            audit,
            pool,
            retrieval,
            generation_config,
        }
    }

    /// Answer a question against the active policy corpus.
    ///
    /// Only infrastructure failures ahead of generation (embedding the
    /// question, searching, reading metadata) surface as `Err`; generation
    /// failures are absorbed into an `Error`-confidence fallback answer.
    pub async fn answer(&self, question: &str, asker: &Asker) -> Result<Answer> {
        let engine = RetrievalEngine::new(self.embeddings, self.vectors, self.pool);
        let chunks = engine
            .retrieve(
                question,
                self.retrieval.top_k,
                self.retrieval.score_threshold,
                true,
            )
            .await?;

        if chunks.is_empty() {
            let answer = no_match_answer();
            self.record(question, asker, &answer).await;
            return Ok(answer);
        }

        let context = format_context(&chunks);
        let prompt = user_prompt(question, &context);

        let answer = match self
            .generation
            .generate(
                SYSTEM_PROMPT,
                &prompt,
                self.generation_config.temperature,
                self.generation_config.max_tokens,
            )
            .await
        {
            Ok(text) => Answer {
                answer: text,
                sources: format_sources(&chunks),
                confidence: confidence(&chunks),
                chunks_retrieved: chunks.len(),
            },
            Err(e) => {
                tracing::error!(error = %e, "answer generation failed");
                error_answer(format_sources(&chunks), chunks.len())
            }
        };

        self.record(question, asker, &answer).await;
        Ok(answer)
    }

    /// Answer a question as a stream of [`AnswerEvent`]s.
    ///
    /// The stream yields answer text fragments in order and terminates with
    /// exactly one `Summary`. The no-match path and every generation
    /// failure mode (connect failure, mid-stream error, empty completion)
    /// emit their fallback message as one fragment before the summary.
    pub async fn answer_stream(
        &'a self,
        question: &str,
        asker: &Asker,
    ) -> Result<BoxStream<'a, Result<AnswerEvent>>> {
        let engine = RetrievalEngine::new(self.embeddings, self.vectors, self.pool);
        let chunks = engine
            .retrieve(
                question,
                self.retrieval.top_k,
                self.retrieval.score_threshold,
                true,
            )
            .await?;

        if chunks.is_empty() {
            let answer = no_match_answer();
            self.record(question, asker, &answer).await;
            return Ok(futures::stream::iter([
                Ok(AnswerEvent::Fragment(NO_MATCH_ANSWER.to_string())),
                Ok(AnswerEvent::Summary(AnswerSummary {
                    sources: Vec::new(),
                    confidence: Confidence::None,
                    chunks_retrieved: 0,
                })),
            ])
            .boxed());
        }

        let context = format_context(&chunks);
        let prompt = user_prompt(question, &context);
        let sources = format_sources(&chunks);
        let tier = confidence(&chunks);
        let count = chunks.len();
        let question = question.to_string();
        let asker = asker.clone();

        let inner = match self
            .generation
            .generate_stream(
                SYSTEM_PROMPT,
                &prompt,
                self.generation_config.temperature,
                self.generation_config.max_tokens,
            )
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "streaming answer generation failed");
                let answer = error_answer(sources.clone(), count);
                self.record(&question, &asker, &answer).await;
                return Ok(futures::stream::iter([
                    Ok(AnswerEvent::Fragment(ERROR_ANSWER.to_string())),
                    Ok(AnswerEvent::Summary(AnswerSummary {
                        sources,
                        confidence: Confidence::Error,
                        chunks_retrieved: count,
                    })),
                ])
                .boxed());
            }
        };

        // Collected text and failure flag are shared between the fragment
        // stage and the terminal summary stage.
        let collected = Arc::new(Mutex::new(String::new()));
        let failed = Arc::new(AtomicBool::new(false));

        let fragments = {
            let collected = Arc::clone(&collected);
            let failed = Arc::clone(&failed);
            inner.scan(false, move |done, item| {
                if *done {
                    return futures::future::ready(None);
                }
                let event = match item {
                    Ok(fragment) => {
                        collected
                            .lock()
                            .expect("collector lock poisoned")
                            .push_str(&fragment);
                        AnswerEvent::Fragment(fragment)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "stream interrupted; emitting error fallback");
                        failed.store(true, Ordering::SeqCst);
                        *done = true;
                        AnswerEvent::Fragment(ERROR_ANSWER.to_string())
                    }
                };
                futures::future::ready(Some(Ok(event)))
            })
        };

        let summary = futures::stream::once(async move {
            let text = collected.lock().expect("collector lock poisoned").clone();
            // An empty completion is treated like a generation failure.
            let generation_failed = failed.load(Ordering::SeqCst) || text.is_empty();

            let answer = if generation_failed {
                error_answer(sources.clone(), count)
            } else {
                Answer {
                    answer: text,
                    sources: sources.clone(),
                    confidence: tier,
                    chunks_retrieved: count,
                }
            };
            self.record(&question, &asker, &answer).await;

            Ok(AnswerEvent::Summary(AnswerSummary {
                sources,
                confidence: answer.confidence,
                chunks_retrieved: count,
            }))
        });

        Ok(fragments.chain(summary).boxed())
    }

    async fn record(&self, question: &str, asker: &Asker, answer: &Answer) {
        let entry = QueryLogEntry::new(
            &asker.user_id,
            &asker.user_role,
            asker.service_id.as_deref(),
            question,
            &answer.answer,
            answer.sources.clone(),
            answer.confidence,
        );
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!(error = %e, "failed to record query log entry");
        }
    }
}

fn no_match_answer() -> Answer {
    Answer {
        answer: NO_MATCH_ANSWER.to_string(),
        sources: Vec::new(),
        confidence: Confidence::None,
        chunks_retrieved: 0,
    }
}

fn error_answer(sources: Vec<SourceCitation>, chunks_retrieved: usize) -> Answer {
    Answer {
        answer: ERROR_ANSWER.to_string(),
        sources,
        confidence: Confidence::Error,
        chunks_retrieved,
    }
}

fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Policy excerpts:\n\n{}\n\nQuestion: {}\n\nAnswer:",
        context, question
    )
}
