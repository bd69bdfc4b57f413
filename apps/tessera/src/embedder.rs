//! Embedding providers reachable from the binary.
//!
//! `HttpEmbedder` talks to any OpenAI-compatible `/v1/embeddings` endpoint
//! (Ollama, OpenAI, vLLM, ...). `hash` selects the offline `HashEmbedder`
//! from the core.

use crate::config::{EmbeddingConfig, Provider};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Embedder, HashEmbedder, TesseraError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote embedding model over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

impl HttpEmbedder {
    /// Build from config. The API key is read once from the environment
    /// variable named in `api_key_env`; an unset variable means no key.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, TesseraError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TesseraError::Embedding(format!("cannot build HTTP client: {e}")))?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|key| !key.is_empty());
        Ok(Self {
            http,
            url: config.url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, TesseraError> {
        let mut request = self.http.post(&self.url).json(&EmbeddingsRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TesseraError::Embedding(format!("request to {} failed: {e}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TesseraError::Embedding(format!(
                "{} returned {status}: {body}",
                self.url
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| TesseraError::Embedding(format!("malformed response: {e}")))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| TesseraError::Embedding("response carried no embedding".to_string()))?;

        if vector.len() != self.dimension {
            return Err(TesseraError::Embedding(format!(
                "model '{}' returned {} dimensions, {} configured",
                self.model,
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }
}

/// Instantiate the provider named in `config`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, TesseraError> {
    match config.provider {
        Provider::Http => {
            tracing::debug!(url = %config.url, model = %config.model, "using HTTP embedder");
            Ok(Arc::new(HttpEmbedder::new(config)?))
        }
        Provider::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_provider_has_configured_dimension() {
        let config = EmbeddingConfig {
            provider: Provider::Hash,
            dimension: 48,
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).expect("build");
        assert_eq!(embedder.dimension(), 48);
    }

    #[test]
    fn response_shape_is_openai_compatible() {
        let body = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25]}],"model":"m"}"#;
        let parsed: EmbeddingsResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.data[0].embedding, vec![0.5, -0.25]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_embedding_error() {
        let config = EmbeddingConfig {
            url: "http://127.0.0.1:9/v1/embeddings".to_string(),
            api_key_env: None,
            dimension: 8,
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&config).expect("client");
        let err = embedder.embed("hello").await.expect_err("no server");
        assert!(matches!(err, TesseraError::Embedding(_)));
    }
}
