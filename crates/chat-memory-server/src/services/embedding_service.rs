use crate::config::EmbeddingConfig;
use crate::memory::EmbeddingProvider;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    content: &'a str,
    input: &'a str,
}

/// HTTP client for a llama.cpp / OpenAI-compatible embedding server
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    batch_concurrency: usize,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            dimension: config.dimension,
            batch_concurrency: config.batch_concurrency.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_internal(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.model,
            content: text,
            input: text, // Send both for compatibility
        };

        let url = format!("{}/embedding", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to connect to embedding server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API error ({}): {}", status, body);
        }

        let json_value: Value = response
            .json()
            .await
            .context("Failed to parse embedding response as JSON")?;

        let embedding = parse_embedding(&json_value)?;
        check_embedding(&embedding, self.dimension)?;

        Ok(embedding)
    }
}

/// Pull the vector out of the response shapes seen in the wild:
/// `{"embedding": [..]}`, `{"data": [{"embedding": [..]}]}`,
/// `[{"embedding": [..]}]` and a bare `[..]`.
fn parse_embedding(value: &Value) -> Result<Vec<f32>> {
    let floats = match value {
        Value::Array(arr) => match arr.first() {
            None => anyhow::bail!("Empty array returned from embedding server"),
            Some(first) if first.is_object() => first.get("embedding").and_then(Value::as_array),
            Some(_) => Some(arr),
        },
        Value::Object(obj) => obj.get("embedding").and_then(Value::as_array).or_else(|| {
            obj.get("data")
                .and_then(Value::as_array)
                .and_then(|data| data.first())
                .and_then(|first| first.get("embedding"))
                .and_then(Value::as_array)
        }),
        _ => None,
    };

    let Some(floats) = floats else {
        anyhow::bail!("Unrecognized embedding response format: {}", value);
    };

    floats
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("Non-numeric embedding component: {}", v))
        })
        .collect()
}

fn check_embedding(embedding: &[f32], dimension: usize) -> Result<()> {
    if embedding.is_empty() {
        anyhow::bail!("Generated embedding is empty");
    }

    if embedding.len() != dimension {
        anyhow::bail!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimension,
            embedding.len()
        );
    }

    if embedding.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("Embedding contains non-finite values");
    }

    Ok(())
}

#[async_trait::async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_internal(text).await
    }

    /// Up to `batch_concurrency` requests in flight; output keeps input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("Embedding batch of {} texts", texts.len());

        let requests: Vec<_> = texts.iter().map(|text| self.embed_internal(text)).collect();
        stream::iter(requests)
            .buffered(self.batch_concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_llama_cpp_format() {
        let value = json!({"embedding": [0.1, 0.2, 0.3]});
        assert_eq!(parse_embedding(&value).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_parse_openai_formats() {
        let data = json!({"data": [{"embedding": [1.0, 2.0]}]});
        assert_eq!(parse_embedding(&data).unwrap(), vec![1.0, 2.0]);

        let list = json!([{"embedding": [3.0]}]);
        assert_eq!(parse_embedding(&list).unwrap(), vec![3.0]);

        let bare = json!([4.0, 5.0]);
        assert_eq!(parse_embedding(&bare).unwrap(), vec![4.0, 5.0]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_embedding(&json!([])).is_err());
        assert!(parse_embedding(&json!({"vector": [1.0]})).is_err());
        assert!(parse_embedding(&json!({"embedding": [1.0, "x"]})).is_err());
        assert!(parse_embedding(&json!("nope")).is_err());
    }

    #[test]
    fn test_dimension_check() {
        assert!(check_embedding(&[0.1, 0.2], 2).is_ok());
        assert!(check_embedding(&[0.1], 2).is_err());
        assert!(check_embedding(&[], 0).is_err());
    }

    #[test]
    fn test_service_from_config() {
        let service = EmbeddingService::new(EmbeddingConfig {
            model: "nomic-embed-text".to_string(),
            base_url: "http://localhost:8081/".to_string(),
            dimension: 768,
            timeout_seconds: 5,
            batch_concurrency: 0,
        });

        assert_eq!(service.dimension(), 768);
        assert_eq!(service.base_url, "http://localhost:8081");
        assert_eq!(service.batch_concurrency, 1);
    }
}
