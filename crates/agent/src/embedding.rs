use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use hagglz_core::config::LlmConfig;
use hagglz_core::errors::ApplicationError;
use hagglz_core::memory::EmbeddingCapability;

use crate::error::AgentError;
use crate::llm::HttpLlmClient;

const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic local embedder: signed feature hashing of lowercase word
/// tokens and adjacent-word bigrams, L2-normalised.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, AgentError> {
        if dimensions == 0 {
            return Err(AgentError::Configuration(
                "embedding dimensions must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimensions })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), BIGRAM_WEIGHT);
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl EmbeddingCapability for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApplicationError> {
        Ok(self.vectorize(text))
    }
}

/// OpenAI-compatible `/embeddings` client.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    http: HttpLlmClient,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl HttpEmbeddingClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
        dimensions: usize,
    ) -> Result<Self, AgentError> {
        let model = model.into();
        Ok(Self {
            http: HttpLlmClient::new(base_url, model.clone(), api_key, timeout)?,
            model,
            dimensions,
        })
    }

    pub fn from_config(config: &LlmConfig, dimensions: usize) -> Result<Self, AgentError> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            AgentError::Configuration("llm.base_url is required for the http provider".to_string())
        })?;
        Self::new(
            base_url,
            config.embedding_model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
            dimensions,
        )
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, AgentError> {
        let body = EmbeddingRequest { model: &self.model, input: text };
        let response = self.http.post("embeddings").json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status { status: status.as_u16(), body });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|datum| datum.embedding)
            .ok_or_else(|| AgentError::Decode("embedding response had no data".to_string()))?;
        if embedding.len() != self.dimensions {
            return Err(AgentError::Configuration(format!(
                "embedding model returned {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingCapability for HttpEmbeddingClient {
    fn name(&self) -> &'static str {
        "http-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ApplicationError> {
        self.request(text).await.map_err(|error| error.into_application(self.name()))
    }
}
