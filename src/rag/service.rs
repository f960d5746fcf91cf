use std::sync::Arc;

use anyhow::Context as _;
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::rag::chat::{ChatMessage, ChatProvider, ToolCall, ToolSpec};
use crate::rag::embedding::EmbeddingProvider;
use crate::rag::store::{SearchHit, VectorStore};

pub const TOP_K: usize = 3;
pub const PREVIEW_CHARS: usize = 200;
pub const AGENT_MAX_TURNS: usize = 4;
pub const RETRIEVE_TOOL: &str = "retrieve_medical_info";

/// Text of the single error frame sent to clients. Details stay in the log.
pub const ERROR_MESSAGE: &str = "An error occurred";

const UNKNOWN_DISEASE: &str = "Unknown";

const ANSWER_GUIDELINES: &str = "- 검색된 문서의 내용만을 기반으로 답변하세요
- 의학적으로 정확하고 신뢰할 수 있는 정보만 제공하세요
- 검색 결과에 없는 내용은 \"제공된 문서에는 해당 정보가 없습니다\"라고 답하세요
- 한국어로 친절하고 이해하기 쉽게 답변하세요";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub disease_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

impl SourceDocument {
    fn from_hit(hit: &SearchHit) -> Self {
        let mut content = hit.text.chars().take(PREVIEW_CHARS).collect::<String>();
        content.push_str("...");
        Self {
            disease_name: disease_name(hit).to_owned(),
            content,
            section: Some(hit.metadata.title.clone()).filter(|t| !t.is_empty()),
        }
    }
}

/// One frame of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RagEvent {
    Sources { sources: Vec<SourceDocument> },
    Chunk { chunk: String },
    Done,
    Error { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    /// Retrieve first, then generate from the retrieved context.
    Direct,
    /// Let the model decide when to call the retrieval tool.
    Agent,
}

pub struct RagService {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    chat: Arc<dyn ChatProvider>,
    top_k: usize,
}

impl RagService {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        chat: Arc<dyn ChatProvider>,
    ) -> Self {
        Self {
            embeddings,
            store,
            chat,
            top_k: TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub async fn retrieve(&self, query: &str) -> anyhow::Result<Vec<SearchHit>> {
        let vector = self
            .embeddings
            .embed_query(query)
            .await
            .context("embed query")?;
        let hits = self
            .store
            .search(&vector, self.top_k)
            .await
            .context("search vector index")?;
        tracing::info!(hits = hits.len(), "retrieved documents");
        Ok(hits)
    }

    /// Streams the answer to `query`. The stream always ends with exactly one
    /// `Done` or `Error` frame.
    pub fn answer(self: &Arc<Self>, query: String, mode: AnswerMode) -> ReceiverStream<RagEvent> {
        let (tx, rx) = mpsc::channel(32);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(?mode, "answering query");
            let result = match mode {
                AnswerMode::Direct => service.answer_direct(&query, &tx).await,
                AnswerMode::Agent => service.answer_agent(&query, &tx).await,
            };
            let last = match result {
                Ok(()) => {
                    tracing::info!(?mode, "answer completed");
                    RagEvent::Done
                }
                Err(err) => {
                    tracing::error!(?mode, error = %format!("{err:#}"), "answer failed");
                    RagEvent::Error {
                        error: ERROR_MESSAGE.to_owned(),
                    }
                }
            };
            if tx.send(last).await.is_err() {
                tracing::debug!("client went away before the final frame");
            }
        });
        ReceiverStream::new(rx)
    }

    async fn answer_direct(&self, query: &str, tx: &mpsc::Sender<RagEvent>) -> anyhow::Result<()> {
        let hits = self.retrieve(query).await?;
        emit(
            tx,
            RagEvent::Sources {
                sources: hits.iter().map(SourceDocument::from_hit).collect(),
            },
        )
        .await?;

        let prompt = direct_prompt(query, &hits);
        let mut deltas = self
            .chat
            .stream(&[ChatMessage::user(prompt)])
            .await
            .context("start answer stream")?;
        while let Some(delta) = deltas.next().await {
            let delta = delta.context("read answer stream")?;
            if !delta.is_empty() {
                emit(tx, RagEvent::Chunk { chunk: delta }).await?;
            }
        }
        Ok(())
    }

    async fn answer_agent(&self, query: &str, tx: &mpsc::Sender<RagEvent>) -> anyhow::Result<()> {
        let tools = [retrieve_tool()];
        let mut messages = vec![
            ChatMessage::system(agent_system_prompt()),
            ChatMessage::user(query),
        ];
        let mut sources_sent = false;

        for turn in 1..=AGENT_MAX_TURNS {
            let reply = self
                .chat
                .complete(&messages, &tools)
                .await
                .with_context(|| format!("agent turn {turn}"))?;

            if reply.tool_calls.is_empty() {
                if let Some(text) = reply.content.filter(|t| !t.trim().is_empty()) {
                    emit(tx, RagEvent::Chunk { chunk: text }).await?;
                    return Ok(());
                }
                tracing::warn!(
                    turn,
                    "agent returned an empty reply; answering from gathered context"
                );
                return self.stream_final_answer(&messages, tx).await;
            }

            let calls = reply.tool_calls.clone();
            messages.push(reply);
            for call in calls {
                tracing::info!(turn, tool = %call.function.name, "agent tool call");
                let (output, hits) = self.run_tool(&call).await?;
                if !sources_sent && !hits.is_empty() {
                    emit(
                        tx,
                        RagEvent::Sources {
                            sources: hits.iter().map(SourceDocument::from_hit).collect(),
                        },
                    )
                    .await?;
                    sources_sent = true;
                }
                messages.push(ChatMessage::tool_result(call.id, output));
            }
        }

        tracing::warn!(
            max_turns = AGENT_MAX_TURNS,
            "agent did not finish within the turn limit; answering from gathered context"
        );
        self.stream_final_answer(&messages, tx).await
    }

    async fn stream_final_answer(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<RagEvent>,
    ) -> anyhow::Result<()> {
        let mut deltas = self
            .chat
            .stream(messages)
            .await
            .context("start final answer stream")?;
        while let Some(delta) = deltas.next().await {
            let delta = delta.context("read final answer stream")?;
            if !delta.is_empty() {
                emit(tx, RagEvent::Chunk { chunk: delta }).await?;
            }
        }
        Ok(())
    }

    /// Model-side mistakes come back as tool output; retrieval failures are
    /// errors.
    async fn run_tool(&self, call: &ToolCall) -> anyhow::Result<(String, Vec<SearchHit>)> {
        if call.function.name != RETRIEVE_TOOL {
            tracing::warn!(tool = %call.function.name, "model called an unknown tool");
            return Ok((format!("Unknown tool: {}", call.function.name), Vec::new()));
        }

        #[derive(Deserialize)]
        struct RetrieveArgs {
            query: String,
        }

        let args = match serde_json::from_str::<RetrieveArgs>(&call.function.arguments) {
            Ok(args) => args,
            Err(err) => {
                tracing::warn!(
                    arguments = %call.function.arguments,
                    error = %err,
                    "invalid tool arguments"
                );
                return Ok((format!("Invalid arguments for {RETRIEVE_TOOL}: {err}"), Vec::new()));
            }
        };

        let hits = self.retrieve(&args.query).await?;
        let output = hits
            .iter()
            .map(|hit| format!("Source: {}\nContent: {}", disease_name(hit), hit.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok((output, hits))
    }
}

async fn emit(tx: &mpsc::Sender<RagEvent>, event: RagEvent) -> anyhow::Result<()> {
    tx.send(event)
        .await
        .map_err(|_| anyhow::anyhow!("answer stream receiver dropped"))
}

fn disease_name(hit: &SearchHit) -> &str {
    if hit.metadata.disease_name.is_empty() {
        UNKNOWN_DISEASE
    } else {
        &hit.metadata.disease_name
    }
}

pub fn retrieve_tool() -> ToolSpec {
    ToolSpec {
        name: RETRIEVE_TOOL.to_owned(),
        description: "의료 정보 데이터베이스에서 질문과 관련된 문서를 검색합니다.".to_owned(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "검색할 질문" }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

fn direct_prompt(query: &str, hits: &[SearchHit]) -> String {
    let context = hits
        .iter()
        .enumerate()
        .map(|(idx, hit)| {
            format!(
                "[문서 {}]\n출처: {}\n내용: {}",
                idx + 1,
                disease_name(hit),
                hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "당신은 의료 정보 전문가입니다.

아래 검색된 문서를 참고하여 사용자의 질문에 답변해주세요.

# 답변 지침
{ANSWER_GUIDELINES}
- 답변 끝에 참고한 문서의 출처를 명시하세요

# 검색된 문서
{context}

# 사용자 질문
{query}

# 답변"
    )
}

fn agent_system_prompt() -> String {
    format!(
        "당신은 의료 정보 전문가입니다.

# 답변 지침
- 의학 관련된 질문이 오면, 반드시 {RETRIEVE_TOOL} 도구로 관련 문서를 먼저 검색하세요.
- 의학과 관련되지 않은 질문은 그냥 답변하세요.
{ANSWER_GUIDELINES}
- 검색한 문서의 출처를 언급하세요"
    )
}
