//! Retrieval-augmented answering over the indexed documents.

pub mod chat;
pub mod embedding;
pub mod service;
pub mod store;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::{ChatEngine, EmbeddingArgs, EmbeddingEngine, RagArgs};
use crate::openai::OpenAiConfig;
use crate::raw_store;
use chat::{ChatProvider, NoopChat, OpenAiChat};
use embedding::{EmbeddingProvider, HashingEmbeddings, OpenAiEmbeddings};
use service::RagService;
use store::JsonVectorStore;

pub fn build_embeddings(args: &EmbeddingArgs) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    Ok(match args.embedding_engine {
        EmbeddingEngine::Openai => Arc::new(OpenAiEmbeddings::new(OpenAiConfig::from_env()?)?),
        EmbeddingEngine::Hashing => Arc::new(HashingEmbeddings::new(args.hashing_dimensions)),
    })
}

pub fn build_chat(engine: ChatEngine) -> anyhow::Result<Arc<dyn ChatProvider>> {
    Ok(match engine {
        ChatEngine::Openai => Arc::new(OpenAiChat::new(OpenAiConfig::from_env()?)?),
        ChatEngine::Noop => Arc::new(NoopChat),
    })
}

pub async fn open_store(
    data_dir: &Path,
    embeddings: &dyn EmbeddingProvider,
) -> anyhow::Result<JsonVectorStore> {
    let path = raw_store::index_path(data_dir);
    JsonVectorStore::open(&path, &embeddings.model())
        .await
        .with_context(|| format!("open vector index: {}", path.display()))
}

/// Wires providers and the on-disk index into a service. Fails when the
/// index has not been built yet.
pub async fn build_service(args: &RagArgs) -> anyhow::Result<RagService> {
    let embeddings = build_embeddings(&args.embedding).context("embedding provider")?;
    let chat = build_chat(args.chat_engine).context("chat provider")?;
    let store = open_store(Path::new(&args.data_dir), embeddings.as_ref()).await?;
    if store.is_empty().await {
        anyhow::bail!(
            "vector index {} is empty; run `medical-rag index` first",
            store.path().display()
        );
    }
    Ok(RagService::new(embeddings, Arc::new(store), chat).with_top_k(args.top_k))
}
