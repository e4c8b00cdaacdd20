//! Common utilities for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use article_core::{LlmProvider, Settings, TtsProvider};
use server::config::ServerConfig;
use server::{build_router, AppState};

pub const ARTICLE: &str = r#"{"t":"海の物語","s":"关于大海的故事","ps":[{"ts":[{"w":"海","r":"うみ","tg":true,"m":"大海"},{"w":"は","tg":false}]},{"ts":[{"w":"青い","r":"あおい","tg":true,"m":"蓝色的"},{"w":"です","tg":false}]}]}"#;

/// Calls received by the mock provider, per kind.
#[derive(Default)]
pub struct ProviderCalls {
    pub stream: AtomicUsize,
    pub translate: AtomicUsize,
    pub chat: AtomicUsize,
    pub explain: AtomicUsize,
    /// Delay before every answer, in milliseconds.
    pub delay_ms: AtomicU64,
}

impl ProviderCalls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

async fn completions(
    State(calls): State<Arc<ProviderCalls>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != "Bearer sk-test" {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }

    let delay = calls.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    if body["stream"] == json!(true) {
        calls.stream.fetch_add(1, Ordering::SeqCst);
        let mut text = String::new();
        let chars: Vec<char> = ARTICLE.chars().collect();
        for piece in chars.chunks(11) {
            let piece: String = piece.iter().collect();
            let chunk = json!({ "choices": [{ "delta": { "content": piece } }] });
            text.push_str(&format!("data: {chunk}\n\n"));
        }
        text.push_str("data: [DONE]\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response();
    }

    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
    let content = if prompt.starts_with("Translate to Simplified Chinese") {
        calls.translate.fetch_add(1, Ordering::SeqCst);
        "大海。".to_string()
    } else if prompt.contains("Return JSON") {
        calls.explain.fetch_add(1, Ordering::SeqCst);
        r#"{"reading":"うみ","meaning":"大海"}"#.to_string()
    } else {
        calls.chat.fetch_add(1, Ordering::SeqCst);
        "「海」は大海という意味です (*^▽^*)".to_string()
    };
    Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
        .into_response()
}

/// Spin up an OpenAI-compatible mock provider on a free local port.
pub async fn spawn_provider() -> (SocketAddr, Arc<ProviderCalls>) {
    let calls = Arc::new(ProviderCalls::default());
    let app = Router::new()
        .route("/chat/completions", post(completions))
        .with_state(calls.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, calls)
}

pub fn provider_settings(addr: SocketAddr, api_key: &str) -> Settings {
    Settings {
        llm_provider: LlmProvider::Custom,
        api_key: api_key.to_string(),
        base_url: format!("http://{addr}"),
        model: "mock-model".to_string(),
        tts_provider: TtsProvider::Browser,
        ..Settings::default()
    }
}

pub struct TestApp {
    pub router: Router,
    pub calls: Arc<ProviderCalls>,
    pub addr: SocketAddr,
    // Keeps the data directory alive for the test's duration.
    pub data_dir: tempfile::TempDir,
}

/// Create a test app instance backed by a mock provider and a temp data dir
pub async fn create_test_app() -> TestApp {
    create_test_app_with_key("sk-test").await
}

pub async fn create_test_app_with_key(api_key: &str) -> TestApp {
    create_test_app_with(api_key, |_| {}).await
}

/// Like `create_test_app_with_key`, with a hook to adjust the server config.
pub async fn create_test_app_with(api_key: &str, configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let (addr, calls) = spawn_provider().await;
    let data_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        data_dir: data_dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    configure(&mut config);
    let state = AppState::new(config, provider_settings(addr, api_key));
    let router = build_router(state).expect("router builds");
    TestApp {
        router,
        calls,
        addr,
        data_dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, body.to_vec())
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    pub async fn json(&self, method: &str, uri: &str, payload: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    /// POST /generate and return the decoded server-sent events.
    pub async fn generate(&self, payload: Value) -> (StatusCode, Vec<(String, Value)>) {
        let request = Request::builder()
            .method("POST")
            .uri("/generate")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, parse_sse(&String::from_utf8_lossy(&body)))
    }
}

/// Split an SSE body into `(event, data)` pairs, skipping comments.
pub fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = String::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push_str(v.trim_start());
                }
            }
            let name = name?;
            Some((name, serde_json::from_str(&data).unwrap_or(Value::Null)))
        })
        .collect()
}
