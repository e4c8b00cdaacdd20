use std::net::SocketAddr;

use article_core::{
    drive, ArticleAssembler, GenerateRequest, Genre, JlptLevel, LlmClient, LlmError, LlmProvider,
    Settings,
};
use axum::{
    extract::Path,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

const ARTICLE: &str = r#"{"t":"海の物語","s":"关于大海的故事","ps":[{"ts":[{"w":"海","r":"うみ","tg":true,"m":"大海"}]},{"ts":[{"w":"です","tg":false}]}]}"#;

fn sse_body(pieces: &[&str], delta: impl Fn(&str) -> Value) -> String {
    let mut body = String::new();
    for piece in pieces {
        body.push_str("data: ");
        body.push_str(&delta(piece).to_string());
        body.push_str("\n\n");
    }
    body
}

fn pieces() -> Vec<&'static str> {
    // Cut on char boundaries, including inside the first paragraph.
    let mut out = Vec::new();
    let mut rest = ARTICLE;
    while !rest.is_empty() {
        let mut cut = rest.len().min(17);
        while !rest.is_char_boundary(cut) {
            cut += 1;
        }
        let (head, tail) = rest.split_at(cut);
        out.push(head);
        rest = tail;
    }
    out
}

async fn openai(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != "Bearer sk-test" {
        return (StatusCode::UNAUTHORIZED, "invalid api key".to_string()).into_response();
    }

    if body["stream"] == json!(true) {
        let mut text = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_string();
        text.push_str(&sse_body(&pieces(), |p| {
            json!({ "choices": [{ "delta": { "content": p } }] })
        }));
        text.push_str("data: [DONE]\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response();
    }

    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
    let content = if prompt.contains("Return JSON") {
        "```json\n{\"reading\":\"うみ\",\"meaning\":\"大海\"}\n```".to_string()
    } else {
        "  大海。 ".to_string()
    };
    Json(json!({ "choices": [{ "message": { "role": "assistant", "content": content } }] }))
        .into_response()
}

async fn gemini(Path(rest): Path<String>) -> impl IntoResponse {
    if !rest.ends_with(":streamGenerateContent") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let text = sse_body(&pieces(), |p| {
        json!({ "candidates": [{ "content": { "parts": [{ "text": p }] } }] })
    });
    ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response()
}

async fn spawn_provider() -> SocketAddr {
    let app = Router::new()
        .route("/chat/completions", post(openai))
        .route("/v1beta/models/{*rest}", post(gemini));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn request() -> GenerateRequest {
    GenerateRequest {
        level: JlptLevel::N4,
        genre: Genre::Story,
        topic: "海".into(),
    }
}

fn custom(addr: SocketAddr, key: &str) -> Settings {
    Settings {
        llm_provider: LlmProvider::Custom,
        api_key: key.into(),
        base_url: format!("http://{addr}/"),
        model: "test-model".into(),
        ..Settings::default()
    }
}

async fn assemble(settings: &Settings) -> article_core::Article {
    let client = LlmClient::default();
    let chunks = client.stream_article(settings, &request()).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let pump = tokio::spawn(drive(chunks, tx));

    let mut assembler = ArticleAssembler::new();
    while let Some(event) = rx.recv().await {
        assembler.apply(event);
    }
    assert_eq!(pump.await.unwrap().unwrap(), 2);
    assert!(assembler.is_ended());
    assembler.into_article()
}

#[tokio::test]
async fn openai_compatible_stream_builds_the_article() {
    let addr = spawn_provider().await;
    let article = assemble(&custom(addr, "sk-test")).await;
    assert_eq!(article.title, "海の物語");
    assert_eq!(article.summary, "关于大海的故事");
    assert_eq!(article.paragraphs.len(), 2);
    assert_eq!(article.paragraphs[0].tokens[0].reading.as_deref(), Some("うみ"));
}

#[tokio::test]
async fn gemini_stream_builds_the_article() {
    let addr = spawn_provider().await;
    let settings = Settings {
        llm_provider: LlmProvider::Gemini,
        api_key: "g-test".into(),
        gemini_base_url: format!("http://{addr}"),
        ..Settings::default()
    };
    let article = assemble(&settings).await;
    assert_eq!(article.plain_text(), "海\nです");
}

#[tokio::test]
async fn unauthorized_is_a_provider_error() {
    let addr = spawn_provider().await;
    let client = LlmClient::default();
    let err = client
        .stream_article(&custom(addr, "wrong"), &request())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LlmError::Provider { status: 401, .. }));
    assert!(err.user_message().contains("invalid"));
}

#[tokio::test]
async fn stream_chunks_are_forwarded_in_order() {
    let addr = spawn_provider().await;
    let client = LlmClient::default();
    let chunks = client
        .stream_article(&custom(addr, "sk-test"), &request())
        .await
        .unwrap();
    let text: Vec<String> = chunks.map(|c| c.unwrap()).collect().await;
    assert_eq!(text.concat(), ARTICLE);
}

#[tokio::test]
async fn explain_translate_and_failures() {
    let addr = spawn_provider().await;
    let client = LlmClient::default();
    let settings = custom(addr, "sk-test");

    let explained = client.explain_token(&settings, "海", "海です").await;
    assert_eq!(explained.reading.as_deref(), Some("うみ"));
    assert_eq!(explained.meaning.as_deref(), Some("大海"));

    let translated = client.translate(&settings, "海です").await.unwrap();
    assert_eq!(translated, "大海。");

    let failed = client
        .explain_token(&custom(addr, "wrong"), "海", "海です")
        .await;
    assert_eq!(failed.meaning.as_deref(), Some("Lookup failed"));
}
