use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::{Stream, StreamExt as _};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::rag::service::{AnswerMode, RagEvent, RagService};

#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<RagService>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/default", post(chat_default))
        .route("/api/chat/agent", post(chat_agent))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr().context("local addr")?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve http")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat_default(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    chat(state, body, AnswerMode::Direct)
}

async fn chat_agent(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    chat(state, body, AnswerMode::Agent)
}

fn chat(
    state: AppState,
    body: Result<Json<ChatRequest>, JsonRejection>,
    mode: AnswerMode,
) -> Response {
    let query = match body {
        Ok(Json(ChatRequest { query: Some(query) })) if !query.trim().is_empty() => query,
        Ok(_) => return query_required(),
        Err(rejection) => {
            tracing::debug!(error = %rejection, "rejected chat request body");
            return query_required();
        }
    };
    tracing::info!(?mode, query_chars = query.chars().count(), "chat request");
    Sse::new(event_frames(state.rag.answer(query, mode)))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_frames(
    events: impl Stream<Item = RagEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events.map(|event| {
        Ok(Event::default()
            .json_data(&event)
            .unwrap_or_else(|err| {
                tracing::error!(error = %err, "serialize event");
                Event::default().data(r#"{"type":"error","error":"An error occurred"}"#)
            }))
    })
}

fn query_required() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": "Query is required" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt as _;
    use tower::ServiceExt as _;

    use super::*;
    use crate::rag::chat::NoopChat;
    use crate::rag::embedding::{EmbeddingProvider as _, HashingEmbeddings};
    use crate::rag::store::tests::metadata;
    use crate::rag::store::{JsonVectorStore, VectorRecord, VectorStore as _};

    async fn app(dir: &std::path::Path) -> anyhow::Result<Router> {
        let embeddings = HashingEmbeddings::new(256);
        let store = JsonVectorStore::open(dir.join("vectors.json"), &embeddings.model()).await?;
        store
            .upsert(vec![VectorRecord {
                id: "stomach_chunk_000".to_owned(),
                vector: embeddings.embed_one("위암 초기 증상은 소화불량입니다."),
                text: "위암 초기 증상은 소화불량입니다.".to_owned(),
                metadata: metadata("위암", "증상"),
            }])
            .await?;
        let rag = RagService::new(Arc::new(embeddings), Arc::new(store), Arc::new(NoopChat));
        Ok(router(AppState { rag: Arc::new(rag) }))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_string(response: Response) -> anyhow::Result<String> {
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn data_frames(body: &str) -> Vec<serde_json::Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn health_reports_ok() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = app(dir.path())
            .await?
            .oneshot(Request::get("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
        assert_eq!(json, serde_json::json!({"status": "ok"}));
        Ok(())
    }

    #[tokio::test]
    async fn missing_or_blank_query_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let app = app(dir.path()).await?;
        for (uri, body) in [
            ("/api/chat/default", "{}"),
            ("/api/chat/default", r#"{"query":"   "}"#),
            ("/api/chat/agent", "not json"),
        ] {
            let response = app.clone().oneshot(post_json(uri, body)).await?;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri} {body}");
            let json: serde_json::Value = serde_json::from_str(&body_string(response).await?)?;
            assert_eq!(json, serde_json::json!({"error": "Query is required"}));
        }
        Ok(())
    }

    #[tokio::test]
    async fn default_chat_streams_sources_chunks_and_done() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = app(dir.path())
            .await?
            .oneshot(post_json("/api/chat/default", r#"{"query":"위암 증상"}"#))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let frames = data_frames(&body_string(response).await?);
        assert_eq!(frames[0]["type"], "sources");
        assert_eq!(frames[0]["sources"][0]["disease_name"], "위암");
        assert_eq!(frames[0]["sources"][0]["section"], "증상");
        assert!(frames[1..frames.len() - 1].iter().all(|f| f["type"] == "chunk"));
        assert_eq!(frames.last().unwrap()["type"], "done");
        Ok(())
    }

    #[tokio::test]
    async fn agent_chat_streams_tool_backed_answer() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let response = app(dir.path())
            .await?
            .oneshot(post_json("/api/chat/agent", r#"{"query":"위암 증상"}"#))
            .await?;
        let frames = data_frames(&body_string(response).await?);
        let types = frames
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(types, vec!["sources", "chunk", "done"]);
        assert_eq!(
            frames[1]["chunk"],
            "Source: 위암\nContent: 위암 초기 증상은 소화불량입니다."
        );
        Ok(())
    }
}
