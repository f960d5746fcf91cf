use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::formats::ChunkMetadata;
use crate::raw_store::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts records, replacing any existing record with the same id.
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()>;

    /// The `top_k` most similar records, best first.
    async fn search(&self, query: &[f32], top_k: usize) -> anyhow::Result<Vec<SearchHit>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    model: String,
    dimensions: usize,
    records: Vec<VectorRecord>,
}

/// In-memory cosine-similarity index persisted as one JSON file.
#[derive(Debug)]
pub struct JsonVectorStore {
    path: PathBuf,
    state: RwLock<StoreFile>,
}

impl JsonVectorStore {
    /// Loads the index at `path`, or starts an empty one for `model` when the
    /// file does not exist. An index built by another model is rejected.
    pub async fn open(path: impl Into<PathBuf>, model: &str) -> anyhow::Result<Self> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)
                    .with_context(|| format!("parse vector index: {}", path.display()))?;
                if file.model != model && !file.records.is_empty() {
                    anyhow::bail!(
                        "vector index {} was built with {}, not {model}; re-run `index` with the same embedding engine",
                        path.display(),
                        file.model
                    );
                }
                tracing::info!(path = %path.display(), records = file.records.len(), "loaded vector index");
                file
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => StoreFile {
                model: model.to_owned(),
                ..StoreFile::default()
            },
            Err(err) => {
                return Err(err).with_context(|| format!("read vector index: {}", path.display()));
            }
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn persist(&self) -> anyhow::Result<()> {
        let state = self.state.read().await;
        let json = serde_json::to_vec(&*state).context("serialize vector index")?;
        write_atomic(&self.path, &json).await?;
        tracing::info!(path = %self.path.display(), records = state.records.len(), "saved vector index");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for JsonVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        for record in &records {
            if state.dimensions == 0 && state.records.is_empty() {
                state.dimensions = record.vector.len();
            }
            if record.vector.len() != state.dimensions {
                anyhow::bail!(
                    "record {} has {} dimensions, index has {}",
                    record.id,
                    record.vector.len(),
                    state.dimensions
                );
            }
        }

        let mut positions = state
            .records
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.id.clone(), idx))
            .collect::<HashMap<_, _>>();
        for record in records {
            match positions.get(&record.id) {
                Some(&idx) => state.records[idx] = record,
                None => {
                    positions.insert(record.id.clone(), state.records.len());
                    state.records.push(record);
                }
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> anyhow::Result<Vec<SearchHit>> {
        let state = self.state.read().await;
        if state.records.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != state.dimensions {
            anyhow::bail!(
                "query has {} dimensions, index has {}",
                query.len(),
                state.dimensions
            );
        }

        let mut scored = state
            .records
            .iter()
            .map(|record| (cosine_similarity(query, &record.vector), record))
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, record)| SearchHit {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score,
            })
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
