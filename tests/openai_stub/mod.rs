use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

pub const API_KEY: &str = "sk-stub";
pub const EMBEDDING_DIMENSIONS: usize = 16;
pub const STREAM_DELTAS: [&str; 3] = ["유방암은 ", "유방에 생기는 ", "암입니다."];
pub const AGENT_ANSWER: &str = "검색한 문서에 따르면 유방암의 증상은 멍울입니다.";

/// Minimal OpenAI-compatible server: `/v1/embeddings` and
/// `/v1/chat/completions` (JSON, tool calls and SSE streaming).
pub struct OpenAiStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OpenAiStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start openai stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = {
            let requests = Arc::clone(&requests);
            thread::spawn(move || {
                loop {
                    if shutdown_rx.try_recv().is_ok() {
                        break;
                    }

                    let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                        Ok(Some(req)) => req,
                        Ok(None) => continue,
                        Err(_) => break,
                    };

                    let authorized = request.headers().iter().any(|h| {
                        h.field.equiv("Authorization")
                            && h.value.as_str() == format!("Bearer {API_KEY}")
                    });
                    if !authorized {
                        let _ = request.respond(json_response(
                            401,
                            &serde_json::json!({"error": {"message": "invalid api key"}}),
                        ));
                        continue;
                    }

                    let mut body = String::new();
                    if request.as_reader().read_to_string(&mut body).is_err() {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid request body")
                                .with_status_code(400),
                        );
                        continue;
                    }
                    let Ok(parsed) = serde_json::from_str::<Value>(&body) else {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    };

                    let path = request.url().to_owned();
                    requests
                        .lock()
                        .unwrap()
                        .push(serde_json::json!({"path": path, "body": parsed}));

                    let response = match path.as_str() {
                        "/v1/embeddings" => json_response(200, &embeddings_response(&parsed)),
                        "/v1/chat/completions"
                            if parsed.get("stream").and_then(Value::as_bool) == Some(true) =>
                        {
                            sse_response()
                        }
                        "/v1/chat/completions" => json_response(200, &completion_response(&parsed)),
                        _ => tiny_http::Response::from_string("not found").with_status_code(404),
                    };
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Bodies of every authorized request to `path`, in arrival order.
    pub fn bodies(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r["path"] == path)
            .map(|r| r["body"].clone())
            .collect()
    }
}

impl Drop for OpenAiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header)
}

/// Character-frequency vectors, returned in reverse order to exercise index
/// sorting on the client.
fn embeddings_response(request: &Value) -> Value {
    let inputs = request
        .get("input")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let data = inputs
        .iter()
        .enumerate()
        .rev()
        .map(|(index, input)| {
            let mut vector = vec![0.0f32; EMBEDDING_DIMENSIONS];
            for ch in input.as_str().unwrap_or_default().chars() {
                vector[ch as usize % EMBEDDING_DIMENSIONS] += 1.0;
            }
            serde_json::json!({"object": "embedding", "index": index, "embedding": vector})
        })
        .collect::<Vec<_>>();
    serde_json::json!({
        "object": "list",
        "data": data,
        "model": request.get("model").cloned().unwrap_or(Value::Null),
    })
}

/// Calls the first offered tool until a tool result is present, then answers.
fn completion_response(request: &Value) -> Value {
    let messages = request
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let has_tool_result = messages.iter().any(|m| m["role"] == "tool");
    let tool_name = request.pointer("/tools/0/function/name").and_then(Value::as_str);

    let message = match tool_name {
        Some(name) if !has_tool_result => {
            let query = messages
                .iter()
                .rev()
                .find(|m| m["role"] == "user")
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default();
            serde_json::json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_stub_1",
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::json!({"query": query}).to_string(),
                    }
                }]
            })
        }
        _ => serde_json::json!({"role": "assistant", "content": AGENT_ANSWER}),
    };

    serde_json::json!({
        "id": "chatcmpl-stub",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": message, "finish_reason": "stop"}],
    })
}

fn sse_response() -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let mut body = String::new();
    body.push_str(&format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]})
    ));
    for delta in STREAM_DELTAS {
        body.push_str(&format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": delta}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");

    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/event-stream"[..])
        .expect("build header");
    tiny_http::Response::from_string(body)
        .with_status_code(200)
        .with_header(header)
}
