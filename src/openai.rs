use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::Value;

use crate::rag::chat::{ChatMessage, ToolSpec};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

impl OpenAiConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let api_key =
            non_empty("OPENAI_API_KEY").ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        Ok(Self {
            base_url: non_empty("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            api_key,
            chat_model: non_empty("MEDICAL_RAG_CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_owned()),
            embedding_model: non_empty("MEDICAL_RAG_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned()),
        })
    }
}

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("build OpenAI http client")
}

pub fn endpoint(base_url: &str, path: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/{path}")
}

async fn post_json(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    body: &Value,
) -> anyhow::Result<Value> {
    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response.text().await.context("read OpenAI response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        anyhow::bail!("OpenAI API error ({status}): {message}");
    }
    serde_json::from_str(&raw).context("parse OpenAI response")
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// One vector per input, in input order.
pub async fn embeddings(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    inputs: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    let body = serde_json::json!({
        "model": config.embedding_model,
        "input": inputs,
    });
    let value = post_json(
        client,
        &endpoint(&config.base_url, "embeddings"),
        &config.api_key,
        &body,
    )
    .await?;

    let mut response: EmbeddingResponse =
        serde_json::from_value(value).context("decode embeddings response")?;
    if response.data.len() != inputs.len() {
        anyhow::bail!(
            "embeddings response has {} vectors for {} inputs",
            response.data.len(),
            inputs.len()
        );
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

fn tool_json(tool: &ToolSpec) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn chat_body(config: &OpenAiConfig, messages: &[ChatMessage], tools: &[ToolSpec], stream: bool) -> Value {
    let mut body = serde_json::json!({
        "model": config.chat_model,
        "messages": messages,
        "temperature": 0,
    });
    if let Some(obj) = body.as_object_mut() {
        if !tools.is_empty() {
            obj.insert(
                "tools".to_owned(),
                Value::Array(tools.iter().map(tool_json).collect()),
            );
        }
        if stream {
            obj.insert("stream".to_owned(), Value::Bool(true));
        }
    }
    body
}

/// The assistant message of a non-streaming completion. It carries either text
/// or tool calls.
pub async fn chat_completion(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    messages: &[ChatMessage],
    tools: &[ToolSpec],
) -> anyhow::Result<ChatMessage> {
    let body = chat_body(config, messages, tools, false);
    let value = post_json(
        client,
        &endpoint(&config.base_url, "chat/completions"),
        &config.api_key,
        &body,
    )
    .await?;

    let message = value
        .pointer("/choices/0/message")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing `choices[0].message` in response"))?;
    serde_json::from_value(message).context("decode assistant message")
}

/// Text deltas of a streaming completion. The stream ends after `[DONE]` or
/// the first error.
pub async fn chat_completion_stream(
    client: &reqwest::Client,
    config: &OpenAiConfig,
    messages: &[ChatMessage],
) -> anyhow::Result<BoxStream<'static, anyhow::Result<String>>> {
    let endpoint = endpoint(&config.base_url, "chat/completions");
    let body = chat_body(config, messages, &[], true);
    let response = client
        .post(&endpoint)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    if !status.is_success() {
        let raw = response.text().await.context("read OpenAI response body")?;
        let message = parse_error_message(&raw).unwrap_or(raw);
        anyhow::bail!("OpenAI API error ({status}): {message}");
    }

    let bytes = Box::pin(response.bytes_stream());
    let state = (bytes, SseDecoder::default(), VecDeque::new(), false);
    let deltas = futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut done)| async move {
        loop {
            if let Some(item) = pending.pop_front() {
                return Some((item, (bytes, decoder, pending, done)));
            }
            if done {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => match decoder.push(&chunk) {
                    Ok(events) => {
                        for event in events {
                            match event {
                                SseEvent::Delta(text) => pending.push_back(Ok(text)),
                                SseEvent::Done => done = true,
                            }
                        }
                    }
                    Err(err) => {
                        pending.push_back(Err(err));
                        done = true;
                    }
                },
                Some(Err(err)) => {
                    pending.push_back(Err(anyhow::Error::new(err).context("read OpenAI stream")));
                    done = true;
                }
                None => done = true,
            }
        }
    });
    Ok(deltas.boxed())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental decoder for `data:` lines of a chat completion stream. Input
/// may be split anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> anyhow::Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            let line = std::str::from_utf8(&line).context("stream line is not UTF-8")?;
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                continue;
            }

            let value: Value = serde_json::from_str(data).context("parse stream chunk")?;
            if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
                anyhow::bail!("OpenAI stream error: {message}");
            }
            if let Some(text) = value
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                && !text.is_empty()
            {
                events.push(SseEvent::Delta(text.to_owned()));
            }
        }
        Ok(events)
    }
}
