//! Generation backends for the answering session.
//!
//! | Config Value | Generator |
//! |-------------|-----------|
//! | `"anthropic"` | [`AnthropicGenerator`] (needs `ANTHROPIC_API_KEY`) |
//! | `"echo"` | [`EchoGenerator`], returns the prompt itself |
//! | `"disabled"` | [`DisabledGenerator`], always fails |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use odoo_rag_core::error::GenerationError;
use odoo_rag_core::session::{GenerationRequest, Generator};

use crate::config::GenerationConfig;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Claude via the Anthropic Messages API.
pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    url: String,
    max_retries: u32,
}

impl AnthropicGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            bail!("Anthropic API key is required. Set ANTHROPIC_API_KEY environment variable.");
        }
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_URL.to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn send_with_retries(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(backoff_secs(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.try_request(request).await {
                Ok(text) => return Ok(text),
                Err((retryable, e)) => {
                    if !retryable {
                        return Err(e);
                    }
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        tracing::warn!(
                            "Anthropic request failed (attempt {}/{}), retrying...",
                            attempt + 1,
                            self.max_retries.saturating_add(1)
                        );
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| GenerationError::Service {
            model: request.model.clone(),
            message: "all retry attempts failed".to_string(),
        }))
    }

    /// One call. The flag says whether the failure is worth retrying.
    async fn try_request(
        &self,
        request: &GenerationRequest,
    ) -> Result<String, (bool, GenerationError)> {
        let service = |message: String| GenerationError::Service {
            model: request.model.clone(),
            message,
        };
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| (true, service(format!("request failed: {e}"))))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err((
                retryable,
                service(format!("Anthropic API error ({status}): {error_text}")),
            ));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| (false, service(format!("invalid response: {e}"))))?;
        Ok(collect_text(&parsed))
    }
}

/// Seconds to wait before retry `attempt` (1-based), capped at 32.
fn backoff_secs(attempt: u32) -> u64 {
    1 << attempt.saturating_sub(1).min(5)
}

fn collect_text(response: &MessagesResponse) -> String {
    response
        .content
        .iter()
        .filter(|c| c.content_type == "text")
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl Generator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match tokio::time::timeout(request.timeout, self.send_with_retries(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout {
                model: request.model.clone(),
                after: request.timeout,
            }),
        }
    }
}

/// Returns the prompt unchanged. For offline runs and prompt inspection.
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        Ok(request.prompt.clone())
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::NotConfigured(
            "generation.provider is \"disabled\"".to_string(),
        ))
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicGenerator::new(config)?)),
        "echo" => Ok(Arc::new(EchoGenerator)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
