//! Embedding adapter: turns text (an image's description plus its tag
//! names) into the fixed-width vector stored on `images.embedding`, by
//! building a single "description + tags" input string before calling out
//! to whichever backend is configured.

use crate::config::{AppConfig, EmbeddingMode};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding response had {got} dimensions, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("upstream returned no embedding vector")]
    EmptyResponse,

    #[error("local embedding mode is not available in this build")]
    LocalUnavailable,
}

#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Builds the canonical embedding input from an image's description
    /// and resolved tag names, then embeds it. Kept as a default method so
    /// every adapter builds the input text identically.
    async fn embed_description_tags(
        &self,
        description: &str,
        tag_names: &[String],
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_text(&build_embedding_input(description, tag_names)).await
    }
}

/// `description` followed by a space-joined tag list, matching the
/// original service's input construction order (description first, so
/// truncation by an upstream token limit drops tags before prose).
pub fn build_embedding_input(description: &str, tag_names: &[String]) -> String {
    if tag_names.is_empty() {
        return description.to_string();
    }
    format!("{description}\n\ntags: {}", tag_names.join(", "))
}

/// Deterministic, dependency-free adapter used when `EMBEDDING_MODE=local`
/// and no local model is wired in. Hashes the input into a unit-ish vector
/// so dev/test environments can exercise the full pipeline — including
/// `pgvector` distance ordering — without a real model. Never used when
/// the `postgres` feature's real search scoring is the point of a test;
/// callers needing meaningful similarity should configure `api` mode.
pub struct LocalEmbeddingAdapter {
    dimensions: usize,
}

impl LocalEmbeddingAdapter {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingAdapter for LocalEmbeddingAdapter {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0f32; self.dimensions];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize + i) % self.dimensions;
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Calls a configured embeddings HTTP endpoint (OpenAI-compatible
/// `/embeddings` shape: `{"data": [{"embedding": [...]}]}`).
pub struct RemoteEmbeddingAdapter {
    client: reqwest::Client,
    endpoint_url: String,
    api_key: Option<String>,
    expected_dimensions: usize,
}

impl RemoteEmbeddingAdapter {
    pub fn new(
        endpoint_url: String,
        api_key: Option<String>,
        expected_dimensions: usize,
        timeout_seconds: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .expect("embedding http client always buildable with a plain timeout");

        Self {
            client,
            endpoint_url,
            api_key,
            expected_dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for RemoteEmbeddingAdapter {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut req = self
            .client
            .post(&self.endpoint_url)
            .json(&serde_json::json!({ "input": text }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let value: serde_json::Value = req.send().await?.json().await?;
        let vector = value
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or(EmbeddingError::EmptyResponse)?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Vec<f32>>();

        if vector.len() != self.expected_dimensions {
            return Err(EmbeddingError::DimensionMismatch {
                got: vector.len(),
                expected: self.expected_dimensions,
            });
        }
        Ok(vector)
    }
}

/// Builds the adapter `config.embedding_mode` selects.
pub fn adapter_from_config(config: &AppConfig) -> std::sync::Arc<dyn EmbeddingAdapter> {
    match config.embedding_mode {
        EmbeddingMode::Local => std::sync::Arc::new(LocalEmbeddingAdapter::new(config.embedding_dimensions)),
        EmbeddingMode::Api => {
            let url = config
                .embedding_api_url
                .clone()
                .expect("EMBEDDING_API_URL is required when EMBEDDING_MODE=api");
            std::sync::Arc::new(RemoteEmbeddingAdapter::new(
                url,
                config.embedding_api_key.clone(),
                config.embedding_dimensions,
                config.embedding_timeout_seconds,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_input_appends_tags_after_description() {
        let input = build_embedding_input("a cat", &["animal".to_string(), "pet".to_string()]);
        assert_eq!(input, "a cat\n\ntags: animal, pet");
    }

    #[test]
    fn embedding_input_without_tags_is_just_description() {
        assert_eq!(build_embedding_input("a cat", &[]), "a cat");
    }

    #[tokio::test]
    async fn local_adapter_is_deterministic_and_unit_normalized() {
        let adapter = LocalEmbeddingAdapter::new(64);
        let a = adapter.embed_text("a cat on a mat").await.unwrap();
        let b = adapter.embed_text("a cat on a mat").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn local_adapter_differs_across_distinct_inputs() {
        let adapter = LocalEmbeddingAdapter::new(64);
        let a = adapter.embed_text("a cat on a mat").await.unwrap();
        let b = adapter.embed_text("a dog in a yard").await.unwrap();
        assert_ne!(a, b);
    }
}
