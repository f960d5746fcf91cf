use async_trait::async_trait;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::openai::{self, OpenAiConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message of a chat-completions conversation, in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as produced by the model.
    pub arguments: String,
}

/// A callable tool offered to the model. `parameters` is a JSON schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub type TextStream = BoxStream<'static, anyhow::Result<String>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One model turn. The reply carries either text or tool calls.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ChatMessage>;

    /// One model turn delivered as text deltas.
    async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<TextStream>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChat {
    pub fn new(config: OpenAiConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: openai::http_client()?,
            config,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ChatMessage> {
        tracing::debug!(model = %self.config.chat_model, messages = messages.len(), "chat completion");
        openai::chat_completion(&self.client, &self.config, messages, tools).await
    }

    async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<TextStream> {
        tracing::debug!(model = %self.config.chat_model, messages = messages.len(), "chat completion stream");
        openai::chat_completion_stream(&self.client, &self.config, messages).await
    }
}

/// Offline provider. Answers with the most recent tool result or user
/// message, and calls the first offered tool once before answering.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopChat;

impl NoopChat {
    fn answer(messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .rev()
            .filter(|m| matches!(m.role, Role::Tool | Role::User))
            .filter_map(|m| m.content.clone())
            .find(|content| !content.trim().is_empty())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatProvider for NoopChat {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> anyhow::Result<ChatMessage> {
        let called_tool = messages.iter().any(|m| m.role == Role::Tool);
        if let Some(tool) = tools.first()
            && !called_tool
        {
            let query = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .and_then(|m| m.content.clone())
                .unwrap_or_default();
            return Ok(ChatMessage {
                role: Role::Assistant,
                content: None,
                tool_calls: vec![ToolCall {
                    id: "call_noop_0".to_owned(),
                    kind: function_kind(),
                    function: FunctionCall {
                        name: tool.name.clone(),
                        arguments: serde_json::json!({ "query": query }).to_string(),
                    },
                }],
                tool_call_id: None,
            });
        }
        Ok(ChatMessage::assistant(Self::answer(messages)))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> anyhow::Result<TextStream> {
        let deltas = Self::answer(messages)
            .split_inclusive('\n')
            .map(|line| Ok(line.to_owned()))
            .collect::<Vec<_>>();
        Ok(futures::stream::iter(deltas).boxed())
    }
}
