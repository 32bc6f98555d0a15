use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Black-box text-to-vector gateway. The worker calls this once per unit.
#[async_trait]
pub trait EmbeddingClient: Send + Sync + 'static {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;

    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbeddingClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    provider: String,
    model: String,
}

impl HttpEmbeddingClient {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent("paperquery/0.1")
            .build()
            .map_err(AppError::from)?;

        Ok(Self {
            client,
            base_url: config.embedding_endpoint.trim_end_matches('/').to_string(),
            api_key: config.embedding_api_key.clone(),
            provider: config.embedding_provider.clone(),
            model: config.embedding_model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "input": text,
        }));

        if let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "embedding request failed");
            return Err(AppError::provider(format!(
                "embedding request failed with status {status}"
            )));
        }

        let payload: EmbeddingsResponse = response.json().await?;
        let embedding = payload
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| AppError::provider("embedding response contained no vectors"))?;

        if embedding.is_empty() {
            return Err(AppError::provider("embedding response vector was empty"));
        }

        Ok(embedding)
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Deterministic offline embedder: folds bytes into a fixed-dimension
/// vector and normalizes it. Used by tests and local development where no
/// provider is reachable.
pub struct StubEmbeddingClient {
    dimension: usize,
}

impl StubEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for StubEmbeddingClient {
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if self.dimension == 0 {
            return Err(AppError::provider("embedding dimension must be non-zero"));
        }
        Ok(self.encode(text))
    }

    fn provider(&self) -> &str {
        "stub"
    }

    fn model(&self) -> &str {
        "byte-fold"
    }
}
