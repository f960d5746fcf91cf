use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::chunk;
use crate::cli::IndexArgs;
use crate::formats::Chunk;
use crate::rag;
use crate::rag::embedding::EmbeddingProvider;
use crate::rag::store::{JsonVectorStore, VectorRecord, VectorStore as _};
use crate::raw_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
}

pub async fn run(args: IndexArgs) -> anyhow::Result<()> {
    let data_dir = PathBuf::from(&args.data_dir);
    let embeddings = rag::build_embeddings(&args.embedding).context("embedding provider")?;
    let store = rag::open_store(&data_dir, embeddings.as_ref()).await?;

    let report = index_documents(
        &data_dir,
        embeddings.as_ref(),
        &store,
        args.chunk_size,
        args.chunk_overlap,
        args.batch_size,
    )
    .await?;
    store.persist().await?;
    tracing::info!(
        documents = report.documents,
        chunks = report.chunks,
        total = store.len().await,
        "indexing completed"
    );
    Ok(())
}

pub async fn index_documents(
    data_dir: &Path,
    embeddings: &dyn EmbeddingProvider,
    store: &JsonVectorStore,
    chunk_size: usize,
    chunk_overlap: usize,
    batch_size: usize,
) -> anyhow::Result<IndexReport> {
    let documents = list_documents(&raw_store::processed_dir(data_dir)).await?;
    if documents.is_empty() {
        anyhow::bail!(
            "no processed documents under {}; run `medical-rag convert` first",
            raw_store::processed_dir(data_dir).display()
        );
    }

    let mut report = IndexReport {
        documents: 0,
        chunks: 0,
    };
    for path in &documents {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read document: {}", path.display()))?;
        let (front, chunks) = chunk::chunk_document(&contents, chunk_size, chunk_overlap)
            .with_context(|| format!("chunk document: {}", path.display()))?;
        tracing::info!(
            disease_id = %front.disease_id,
            chunks = chunks.len(),
            "chunked document"
        );

        for batch in chunks.chunks(batch_size.max(1)) {
            embed_batch(embeddings, store, batch)
                .await
                .with_context(|| format!("embed chunks of {}", front.disease_id))?;
        }
        report.documents += 1;
        report.chunks += chunks.len();
    }
    Ok(report)
}

async fn embed_batch(
    embeddings: &dyn EmbeddingProvider,
    store: &JsonVectorStore,
    batch: &[Chunk],
) -> anyhow::Result<()> {
    let texts = batch.iter().map(|c| c.content.clone()).collect::<Vec<_>>();
    let vectors = embeddings.embed(&texts).await?;
    if vectors.len() != batch.len() {
        anyhow::bail!(
            "embedding provider returned {} vectors for {} chunks",
            vectors.len(),
            batch.len()
        );
    }
    let records = batch
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| VectorRecord {
            id: chunk.id.clone(),
            vector,
            text: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
        })
        .collect();
    store.upsert(records).await?;
    tracing::debug!(chunks = batch.len(), "embedded batch");
    Ok(())
}

async fn list_documents(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read dir: {}", dir.display())),
    };
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read dir entry: {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
