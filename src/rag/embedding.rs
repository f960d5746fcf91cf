use async_trait::async_trait;
use sha2::{Digest as _, Sha256};

use crate::openai::{self, OpenAiConfig};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Name recorded in the index so queries use the model that built it.
    fn model(&self) -> String;

    /// One vector per text, in order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed(&[text.to_owned()])
            .await?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding provider returned no vector"))
    }
}

pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiEmbeddings {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: openai::http_client()?,
            config,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model(&self) -> String {
        self.config.embedding_model.clone()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(model = %self.config.embedding_model, texts = texts.len(), "embedding");
        openai::embeddings(&self.client, &self.config, texts).await
    }
}

/// Deterministic feature hashing over lowercase words and their character
/// bigrams. No network, no model download.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbeddings {
    dimensions: usize,
}

impl HashingEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty());

        for word in words {
            self.add_feature(&mut vector, word, 1.0);
            let chars = word.chars().collect::<Vec<_>>();
            for pair in chars.windows(2) {
                let bigram = pair.iter().collect::<String>();
                self.add_feature(&mut vector, &bigram, 0.5);
            }
        }

        let magnitude = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    fn model(&self) -> String {
        format!("hashing-{}", self.dimensions)
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
