use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl every target's menu and detail pages into `<data-dir>/raw/html`.
    Crawl(CrawlArgs),
    /// Reassemble stored pages into `<data-dir>/processed/cancers/<id>.md`.
    Convert(ConvertArgs),
    /// `crawl` followed by `convert`.
    Build(BuildArgs),
    /// Chunk and embed processed Markdown into `<data-dir>/index/vectors.json`.
    Index(IndexArgs),
    /// Answer one question from the index.
    Ask(AskArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Root of the data directory (raw/, processed/, index/).
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// YAML file replacing the built-in target table.
    #[arg(long)]
    pub targets: Option<String>,

    /// Restrict the run to these target ids (repeatable).
    #[arg(long)]
    pub only: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchEngine {
    /// Headless Chromium; renders client-side scripts.
    Browser,
    /// Plain HTTP GET.
    Http,
}

#[derive(Debug, Clone, Args)]
pub struct CrawlArgs {
    #[command(flatten)]
    pub targets: TargetArgs,

    #[arg(long, value_enum, default_value_t = FetchEngine::Browser)]
    pub engine: FetchEngine,

    /// Targets crawled at the same time.
    #[arg(long, default_value_t = 1)]
    pub target_concurrency: usize,

    /// Detail page fetches in flight at the same time, across all targets.
    #[arg(long, default_value_t = 1)]
    pub page_concurrency: usize,

    /// Attempts per detail page before the target fails.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: usize,

    /// Fixed delay between attempts.
    #[arg(long, default_value_t = 60_000)]
    pub retry_delay_ms: u64,

    /// Pause after each page load so client-side rendering can finish.
    #[arg(long, default_value_t = 2_000)]
    pub settle_ms: u64,

    #[arg(long, default_value_t = 60)]
    pub navigation_timeout_secs: u64,

    /// Timeout for every other browser operation.
    #[arg(long, default_value_t = 30)]
    pub operation_timeout_secs: u64,

    /// Do not re-fetch detail pages that are already stored.
    #[arg(long)]
    pub skip_existing: bool,
}

#[derive(Debug, Clone, Args)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub targets: TargetArgs,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub crawl: CrawlArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbeddingEngine {
    /// OpenAI-compatible `/embeddings`.
    Openai,
    /// Offline feature hashing; useful for tests and air-gapped runs.
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChatEngine {
    /// OpenAI-compatible `/chat/completions`.
    Openai,
    /// Echo the retrieved context without calling a model.
    Noop,
}

#[derive(Debug, Clone, Args)]
pub struct EmbeddingArgs {
    #[arg(long, value_enum, default_value_t = EmbeddingEngine::Openai)]
    pub embedding_engine: EmbeddingEngine,

    /// Vector size of the hashing engine.
    #[arg(long, default_value_t = 256)]
    pub hashing_dimensions: usize,
}

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[arg(long, default_value_t = 2_000)]
    pub chunk_size: usize,

    #[arg(long, default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Texts per embeddings request.
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Args)]
pub struct RagArgs {
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[arg(long, value_enum, default_value_t = ChatEngine::Openai)]
    pub chat_engine: ChatEngine,

    /// Chunks retrieved per query.
    #[arg(long, default_value_t = 3)]
    pub top_k: usize,
}

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(long)]
    pub query: String,

    /// Let the model decide when to search, through a retrieval tool.
    #[arg(long)]
    pub agent: bool,

    #[command(flatten)]
    pub rag: RagArgs,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Streaming RAG HTTP server")]
pub struct ServerCli {
    #[arg(long, default_value = "127.0.0.1:3001")]
    pub addr: String,

    #[command(flatten)]
    pub rag: RagArgs,
}
