//! Answer generation provider abstraction.
//!
//! [`GenerationProvider`] is the seam between the answer composer and the
//! language-model capability: one blocking call for complete answers and
//! one streaming call yielding text fragments as they arrive. The OpenAI
//! implementation shares the retry policy used for embeddings: 429 and 5xx
//! retry with exponential backoff, other 4xx fail immediately.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{Error, Result};

/// Interface to the text-generation capability.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate a complete answer for the given system and user prompts.
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    /// Generate an answer as a stream of text fragments. Concatenating the
    /// fragments in order yields the same text a blocking call would
    /// return.
    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<BoxStream<'_, Result<String>>>;
}

// ============ OpenAI Provider ============

/// Generation provider backed by the OpenAI chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiGeneration {
    model: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiGeneration {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Provider("generation.model required".to_string()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::Provider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Provider(e.to_string()))?;

        Ok(Self {
            model,
            max_retries: config.max_retries,
            client,
        })
    }

    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Provider("OPENAI_API_KEY not set".to_string()))?;

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(Error::Generation(format!(
                            "chat API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::Generation(format!(
                        "chat API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Generation(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::Generation("generation failed after retries".to_string())))
    }

    fn request_body(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": stream,
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let body = self.request_body(system_prompt, user_prompt, temperature, max_tokens, false);
        let response = self.send_with_retry(&body).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let content = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        if content.is_empty() {
            return Err(Error::Generation("empty completion".to_string()));
        }

        Ok(content)
    }

    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<BoxStream<'_, Result<String>>> {
        let body = self.request_body(system_prompt, user_prompt, temperature, max_tokens, true);
        let response = self.send_with_retry(&body).await?;

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Generation(e.to_string())))
            .scan(String::new(), |buffer, chunk| {
                let out = match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        let mut fragments = Vec::new();
                        while let Some(pos) = buffer.find('\n') {
                            let line = buffer[..pos].trim().to_string();
                            buffer.drain(..=pos);
                            if let Some(delta) = parse_sse_line(&line) {
                                fragments.push(Ok(delta));
                            }
                        }
                        fragments
                    }
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(futures::stream::iter(out)))
            })
            .flatten();

        Ok(stream.boxed())
    }
}

/// Parse one SSE line from a chat completions stream, returning the content
/// delta if the line carries one.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.strip_prefix("data: ")?;
    if data == "[DONE]" {
        return None;
    }

    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    let delta = json
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    if delta.is_empty() {
        None
    } else {
        Some(delta.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_with_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), Some("Hello".to_string()));
    }

    #[test]
    fn sse_done_marker_yields_nothing() {
        assert_eq!(parse_sse_line("data: [DONE]"), None);
    }

    #[test]
    fn sse_non_data_lines_are_ignored() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
    }

    #[test]
    fn sse_delta_without_content_yields_nothing() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line), None);
    }
}
