//! Embedding providers for the CLI.
//!
//! Implements [`Embedder`] for the configured backend:
//! - **hash**: [`HashEmbedder`] from the core crate. Deterministic, offline.
//! - **openai**: `POST /v1/embeddings` (or a compatible endpoint via `url`).
//! - **ollama**: `POST {url}/api/embed` on a local Ollama server.
//!
//! # Retry Strategy
//!
//! Remote providers retry transient failures with exponential backoff:
//! - HTTP 429 and 5xx → retry
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! When every attempt timed out the error is [`IndexServiceError::Timeout`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use odoo_rag_core::embedding::{Embedder, HashEmbedder};
use odoo_rag_core::error::IndexServiceError;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    OpenAI,
    Ollama,
}

/// Embedder that calls an HTTP embeddings API.
pub struct HttpEmbedder {
    backend: Backend,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    max_retries: u32,
    timeout: Duration,
}

impl HttpEmbedder {
    pub fn openai(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let endpoint = config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string());
        Self::build(Backend::OpenAI, config, endpoint, Some(api_key))
    }

    pub fn ollama(config: &EmbeddingConfig) -> Result<Self> {
        let base = config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string());
        let endpoint = format!("{}/api/embed", base.trim_end_matches('/'));
        Self::build(Backend::Ollama, config, endpoint, None)
    }

    fn build(
        backend: Backend,
        config: &EmbeddingConfig,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for remote providers"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for remote providers"))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            backend,
            client,
            endpoint,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
            timeout,
        })
    }

    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "input": texts,
        })
    }

    fn parse(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>, IndexServiceError> {
        match self.backend {
            Backend::OpenAI => parse_openai_response(json),
            Backend::Ollama => parse_ollama_response(json),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = self.request_body(texts);
        let mut last_err = None;
        let mut all_timeouts = true;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| IndexServiceError::service("embed", e))?;
                        let vectors = self.parse(&json)?;
                        if vectors.len() != texts.len() {
                            return Err(IndexServiceError::service(
                                "embed",
                                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
                            ));
                        }
                        if let Some(v) = vectors.iter().find(|v| v.len() != self.dims) {
                            return Err(IndexServiceError::DimensionMismatch {
                                expected: self.dims,
                                actual: v.len(),
                            });
                        }
                        return Ok(vectors);
                    }

                    all_timeouts = false;
                    let body_text = response.text().await.unwrap_or_default();
                    let err = IndexServiceError::service(
                        "embed",
                        format!("API error {}: {}", status, body_text),
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    if !e.is_timeout() {
                        all_timeouts = false;
                    }
                    last_err = Some(IndexServiceError::service("embed", e));
                }
            }
        }

        if all_timeouts {
            return Err(IndexServiceError::Timeout {
                operation: "embed".to_string(),
                after: self.timeout,
            });
        }
        Err(last_err
            .unwrap_or_else(|| IndexServiceError::service("embed", "failed after retries")))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, IndexServiceError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| IndexServiceError::service("embed", "response missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| IndexServiceError::service("embed", "response missing embedding"))?;
        indexed.push((index, to_floats(embedding)));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, IndexServiceError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| IndexServiceError::service("embed", "response missing embeddings"))?;
    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|values| to_floats(values))
                .ok_or_else(|| IndexServiceError::service("embed", "embedding is not an array"))
        })
        .collect()
}

fn to_floats(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"hash"` | [`HashEmbedder`] (`dims` defaults to 256) |
/// | `"openai"` | [`HttpEmbedder::openai`] |
/// | `"ollama"` | [`HttpEmbedder::ollama`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(match config.dims {
            Some(dims) => HashEmbedder::new(dims),
            None => HashEmbedder::default(),
        })),
        "openai" => Ok(Arc::new(HttpEmbedder::openai(config)?)),
        "ollama" => Ok(Arc::new(HttpEmbedder::ollama(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_response_is_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_response_requires_embeddings() {
        let ok = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&ok).unwrap(), vec![vec![0.5, 0.5]]);
        let bad = serde_json::json!({"embedding": [0.5]});
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[test]
    fn hash_provider_honours_dims() {
        let config = EmbeddingConfig {
            dims: Some(64),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 64);
        assert_eq!(embedder.model_name(), HashEmbedder::MODEL);
    }

    #[test]
    fn ollama_endpoint_is_built_from_base_url() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            url: Some("http://gpu-box:11434/".into()),
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::ollama(&config).unwrap();
        assert_eq!(embedder.endpoint, "http://gpu-box:11434/api/embed");
    }
}
