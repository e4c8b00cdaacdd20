//! Language-model provider client.
//!
//! Article generation is streamed and exposed as a [`ChunkStream`] of text
//! fragments; everything else is a single request raced against a timeout.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{with_timeout, LlmError};
use crate::model::{Article, ChatMessage, GenerateRequest};
use crate::prompt;
use crate::sanitize::parse_lenient;
use crate::settings::{LlmProvider, Settings};
use crate::sse::{gemini_delta, openai_delta, stream_error, SseData, SseDecoder};

/// Default limit for every non-streaming call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const GENERATION_TEMPERATURE: f32 = 0.7;
const GENERATION_MAX_TOKENS: u32 = 8192;
const SHORT_MAX_TOKENS: u32 = 1000;
const EXPLAIN_MAX_TOKENS: u32 = 500;

/// Ordered text fragments of one streamed completion.
pub type ChunkStream = BoxStream<'static, Result<String, LlmError>>;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Reading and gloss for a word the article did not annotate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExplanation {
    #[serde(default)]
    pub reading: Option<String>,
    #[serde(default)]
    pub meaning: Option<String>,
}

impl TokenExplanation {
    pub fn lookup_failed() -> Self {
        Self {
            reading: None,
            meaning: Some("Lookup failed".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new(REQUEST_TIMEOUT)
    }
}

impl LlmClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start streaming an article. The returned stream has no overall
    /// timeout; individual reads fail on their own.
    pub async fn stream_article(
        &self,
        settings: &Settings,
        request: &GenerateRequest,
    ) -> Result<ChunkStream, LlmError> {
        let api_key = settings.effective_api_key().ok_or(LlmError::MissingApiKey)?;
        let prompt = prompt::article_prompt(request);
        info!(
            "Streaming article: provider={:?} model={} level={} topic={}",
            settings.llm_provider, settings.model, request.level, request.topic
        );

        match settings.llm_provider {
            LlmProvider::Gemini => {
                let url = format!(
                    "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                    settings.gemini_base(),
                    settings.model
                );
                let body = json!({
                    "contents": [{ "parts": [{ "text": prompt }] }],
                    "generationConfig": {
                        "responseMimeType": "application/json",
                        "temperature": GENERATION_TEMPERATURE,
                    }
                });
                let response = self
                    .http
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(&body)
                    .send()
                    .await?;
                let response = check_status(response).await?;
                Ok(sse_chunks(response, Dialect::Gemini))
            }
            LlmProvider::OpenAi | LlmProvider::Custom => {
                let url = format!("{}/chat/completions", settings.chat_base_url());
                let body = ChatRequest {
                    model: &settings.model,
                    messages: vec![Message {
                        role: "system",
                        content: &prompt,
                    }],
                    stream: true,
                    response_format: Some(json!({ "type": "json_object" })),
                    temperature: Some(GENERATION_TEMPERATURE),
                    max_tokens: GENERATION_MAX_TOKENS,
                };
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(api_key)
                    .json(&body)
                    .send()
                    .await?;
                let response = check_status(response).await?;
                Ok(sse_chunks(response, Dialect::OpenAi))
            }
        }
    }

    /// Reading and meaning of `word` in `context`. Never fails: any error
    /// collapses into [`TokenExplanation::lookup_failed`].
    pub async fn explain_token(&self, settings: &Settings, word: &str, context: &str) -> TokenExplanation {
        let prompt = prompt::explain_prompt(word, context);
        let result = with_timeout(self.timeout, async {
            let text = self.complete(settings, "system", &prompt, EXPLAIN_MAX_TOKENS, true).await?;
            Ok::<_, LlmError>(parse_lenient::<TokenExplanation>(&text)?)
        })
        .await;
        match result {
            Ok(explanation) => explanation,
            Err(e) => {
                warn!("Token lookup for '{word}' failed: {e}");
                TokenExplanation::lookup_failed()
            }
        }
    }

    /// Simplified Chinese translation of one paragraph.
    pub async fn translate(&self, settings: &Settings, text: &str) -> Result<String, LlmError> {
        let prompt = prompt::translate_prompt(text);
        let translated = with_timeout(
            self.timeout,
            self.complete(settings, "user", &prompt, SHORT_MAX_TOKENS, false),
        )
        .await?;
        let translated = translated.trim().to_string();
        if translated.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(translated)
    }

    /// Ask the reading assistant about the article.
    pub async fn chat(
        &self,
        settings: &Settings,
        message: &str,
        article: &Article,
        history: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let prompt = prompt::chat_prompt(message, article, history);
        with_timeout(
            self.timeout,
            self.complete(settings, "user", &prompt, SHORT_MAX_TOKENS, false),
        )
        .await
    }

    /// One non-streaming completion, returning the raw text.
    async fn complete(
        &self,
        settings: &Settings,
        role: &str,
        prompt: &str,
        max_tokens: u32,
        json_mode: bool,
    ) -> Result<String, LlmError> {
        let api_key = settings.effective_api_key().ok_or(LlmError::MissingApiKey)?;

        match settings.llm_provider {
            LlmProvider::Gemini => {
                let url = format!(
                    "{}/v1beta/models/{}:generateContent",
                    settings.gemini_base(),
                    settings.model
                );
                let mut body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
                if json_mode {
                    body["generationConfig"] = json!({ "responseMimeType": "application/json" });
                }
                let response = self
                    .http
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(&body)
                    .send()
                    .await?;
                let value: Value = check_status(response).await?.json().await?;
                gemini_delta(&value).ok_or(LlmError::EmptyResponse)
            }
            LlmProvider::OpenAi | LlmProvider::Custom => {
                let url = format!("{}/chat/completions", settings.chat_base_url());
                let body = ChatRequest {
                    model: &settings.model,
                    messages: vec![Message { role, content: prompt }],
                    stream: false,
                    response_format: json_mode.then(|| json!({ "type": "json_object" })),
                    temperature: None,
                    max_tokens,
                };
                let response = self
                    .http
                    .post(url)
                    .bearer_auth(api_key)
                    .json(&body)
                    .send()
                    .await?;
                let parsed: ChatResponse = check_status(response).await?.json().await?;
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or(LlmError::EmptyResponse)
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read error response".to_string());
    Err(LlmError::Provider {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Clone, Copy)]
enum Dialect {
    OpenAi,
    Gemini,
}

impl Dialect {
    fn delta(self, chunk: &Value) -> Option<String> {
        match self {
            Dialect::OpenAi => openai_delta(chunk).map(str::to_string),
            Dialect::Gemini => gemini_delta(chunk),
        }
    }
}

fn decode_payload(dialect: Dialect, payload: &str) -> Result<Option<String>, LlmError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|_| LlmError::MalformedStream(payload.chars().take(200).collect()))?;
    if let Some(message) = stream_error(&value) {
        return Err(LlmError::Stream(message));
    }
    Ok(dialect.delta(&value))
}

/// Turn an SSE response body into text fragments.
fn sse_chunks(response: reqwest::Response, dialect: Dialect) -> ChunkStream {
    let mut body = response.bytes_stream();
    let stream = async_stream::try_stream! {
        let mut decoder = SseDecoder::new();
        let mut done = false;
        while let Some(bytes) = body.next().await {
            let bytes = bytes?;
            for data in decoder.feed(&bytes) {
                match data {
                    SseData::Done => done = true,
                    SseData::Payload(payload) => {
                        if let Some(text) = decode_payload(dialect, &payload)? {
                            yield text;
                        }
                    }
                }
            }
        }
        if let Some(SseData::Payload(payload)) = decoder.finish() {
            if let Some(text) = decode_payload(dialect, &payload)? {
                yield text;
            }
        }
        debug!("Provider stream closed (done marker seen: {done})");
    };
    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_payload_is_an_error() {
        let err = decode_payload(Dialect::OpenAi, "{not json").unwrap_err();
        assert!(matches!(err, LlmError::MalformedStream(_)));
    }

    #[test]
    fn in_band_error_is_surfaced() {
        let err = decode_payload(Dialect::OpenAi, r#"{"error":{"message":"overloaded"}}"#).unwrap_err();
        assert!(matches!(err, LlmError::Stream(m) if m == "overloaded"));
    }

    #[test]
    fn role_only_delta_yields_nothing() {
        let out = decode_payload(Dialect::OpenAi, r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let settings = Settings {
            llm_provider: LlmProvider::Custom,
            api_key: String::new(),
            base_url: "http://127.0.0.1:9".into(),
            ..Settings::default()
        };
        // Custom reads OPENAI_API_KEY from the environment; only assert when unset.
        if std::env::var("OPENAI_API_KEY").is_err() {
            let request = GenerateRequest {
                level: crate::model::JlptLevel::N5,
                genre: crate::model::Genre::Story,
                topic: "海".into(),
            };
            let err = LlmClient::default().stream_article(&settings, &request).await.err().unwrap();
            assert!(matches!(err, LlmError::MissingApiKey));
        }
    }
}
