use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info, warn};

use article_core::{
    drive, Article, ArticleAssembler, ChatMessage, ChatRole, GenerateRequest, HistoryItem, LlmError,
    Paragraph, Settings, StreamEvent, TokenExplanation,
};
use speech_core::{SpeechClient, SpeechFetcher, SpeechOutput};

use crate::error::ApiError;
use crate::validation::{
    validate_generate_request, validate_history_id, validate_settings, validate_text, MAX_CHAT_LENGTH,
    MAX_TEXT_LENGTH, MAX_WORD_LENGTH,
};
use crate::{AppState, START_TIME};

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub uptime_seconds: u64,
    pub request_count: u64,
    pub generation_count: u64,
    pub history_items: usize,
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);
    Json(MetricsResponse {
        uptime_seconds: uptime,
        request_count: state.request_count.load(Ordering::Relaxed),
        generation_count: state.generation_count.load(Ordering::Relaxed),
        history_items: state.history.list().await.len(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParagraphPayload<'a> {
    index: usize,
    paragraph: &'a Paragraph,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EndPayload {
    history_id: Option<String>,
    paragraphs: usize,
}

#[derive(Serialize)]
struct ErrorPayload {
    error: String,
}

fn json_event(name: &str, data: &impl Serialize) -> Option<Event> {
    match Event::default().event(name).json_data(data) {
        Ok(event) => Some(event),
        Err(e) => {
            error!("Failed to encode '{name}' event: {e}");
            None
        }
    }
}

/// Stream a new article as server-sent events: `meta` once, `paragraph`
/// per completed paragraph, then `end` (with the saved history id) or
/// `error` (with guidance for the reader).
pub async fn generate_endpoint(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_generate_request(&req)?;
    state.generation_count.fetch_add(1, Ordering::Relaxed);

    let settings = state.current_settings().await;
    let (event_tx, event_rx) = mpsc::channel::<Event>(32);
    info!("Generation requested: level={} genre={:?} topic={}", req.level, req.genre, req.topic);

    tokio::spawn(async move {
        if let Err(e) = run_generation(&state, &settings, &req, &event_tx).await {
            error!("Generation failed: {e}");
            if let Some(event) = json_event("error", &ErrorPayload { error: e.user_message() }) {
                let _ = event_tx.send(event).await;
            }
        }
    });

    let stream = ReceiverStream::new(event_rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn run_generation(
    state: &AppState,
    settings: &Settings,
    req: &GenerateRequest,
    events: &mpsc::Sender<Event>,
) -> Result<(), LlmError> {
    let chunks = state.llm.stream_article(settings, req).await?;
    let (tx, mut rx) = mpsc::channel(32);
    let pump = tokio::spawn(drive(chunks, tx));

    let mut assembler = ArticleAssembler::new();
    while let Some(event) = rx.recv().await {
        let outgoing = match &event {
            StreamEvent::Meta(meta) => json_event("meta", meta),
            StreamEvent::Paragraph(paragraph) => json_event(
                "paragraph",
                &ParagraphPayload {
                    index: assembler.article().paragraphs.len(),
                    paragraph,
                },
            ),
            StreamEvent::End => None,
        };
        assembler.apply(event);
        if let Some(outgoing) = outgoing {
            if events.send(outgoing).await.is_err() {
                debug!("Client disconnected, abandoning generation");
                return Ok(());
            }
        }
    }

    match pump.await {
        Ok(result) => {
            result?;
        }
        Err(e) => return Err(LlmError::Stream(format!("generation task failed: {e}"))),
    }

    let ended = assembler.is_ended();
    let article = assembler.into_article();
    let history_id = if ended && article.is_persistable() {
        match state.history.save(&article).await {
            Ok(item) => Some(item.id),
            Err(e) => {
                warn!("Failed to save article to history: {e}");
                None
            }
        }
    } else {
        None
    };

    if let Some(event) = json_event(
        "end",
        &EndPayload {
            history_id,
            paragraphs: article.paragraphs.len(),
        },
    ) {
        let _ = events.send(event).await;
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct ExplainRequest {
    word: String,
    #[serde(default)]
    context: String,
}

pub async fn explain_endpoint(
    State(state): State<AppState>,
    Json(req): Json<ExplainRequest>,
) -> Result<Json<TokenExplanation>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_text("Word", &req.word, MAX_WORD_LENGTH)?;
    let settings = state.current_settings().await;
    Ok(Json(state.llm.explain_token(&settings, &req.word, &req.context).await))
}

#[derive(Deserialize)]
pub struct TranslateRequest {
    text: String,
}

#[derive(Serialize)]
pub struct TranslateResponse {
    translation: String,
    cached: bool,
}

pub async fn translate_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_text("Text", &req.text, MAX_TEXT_LENGTH)?;
    let settings = state.current_settings().await;
    let translation = state.llm.translate(&settings, &req.text).await?;
    Ok(Json(TranslateResponse {
        translation,
        cached: false,
    }))
}

#[derive(Deserialize)]
pub struct TtsRequest {
    text: String,
}

#[derive(Serialize)]
pub struct TtsResponse {
    /// `remote` when audio is attached, `device` when the client should
    /// speak the text itself.
    source: &'static str,
    audio_base64: Option<String>,
    duration_ms: Option<u64>,
    sample_rate: Option<u32>,
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<TtsResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_text("Text", &req.text, MAX_TEXT_LENGTH)?;

    let client = SpeechClient::new(state.current_settings().await).with_timeout(state.config.llm_timeout());
    match client.fetch(&req.text).await? {
        SpeechOutput::Remote(clip) => {
            let audio_base64 = clip.to_wav_base64()?;
            Ok(Json(TtsResponse {
                source: "remote",
                audio_base64: Some(audio_base64),
                duration_ms: Some(clip.duration().as_millis() as u64),
                sample_rate: Some(clip.sample_rate()),
            }))
        }
        SpeechOutput::Device => Ok(Json(TtsResponse {
            source: "device",
            audio_base64: None,
            duration_ms: None,
            sample_rate: None,
        })),
    }
}

/// Settings as shown to clients: the stored key never leaves the server.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    #[serde(flatten)]
    settings: Settings,
    has_api_key: bool,
}

impl From<Settings> for SettingsView {
    fn from(mut settings: Settings) -> Self {
        let has_api_key = settings.effective_api_key().is_some();
        settings.api_key.clear();
        Self {
            settings,
            has_api_key,
        }
    }
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    Json(state.current_settings().await.into())
}

/// Replace the settings. An empty `apiKey` keeps the stored key.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(mut incoming): Json<Settings>,
) -> Result<Json<SettingsView>, ApiError> {
    validate_settings(&incoming)?;
    let mut current = state.settings.write().await;
    if incoming.api_key.trim().is_empty() {
        incoming.api_key = current.api_key.clone();
    }
    state.settings_store.save(&incoming).await?;
    *current = incoming.clone();
    info!("Settings updated: provider={:?} model={}", incoming.llm_provider, incoming.model);
    Ok(Json(incoming.into()))
}

pub async fn list_history(State(state): State<AppState>) -> Json<Vec<HistoryItem>> {
    Json(state.history.list().await)
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryItem>, ApiError> {
    validate_history_id(&id)?;
    Ok(Json(state.history.get(&id).await?))
}

pub async fn delete_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryItem>>, ApiError> {
    validate_history_id(&id)?;
    let remaining = state.history.delete(&id).await?;
    info!("Deleted history item {id}, {} remaining", remaining.len());
    Ok(Json(remaining))
}

fn paragraph_text(article: &Article, index: usize) -> Result<String, ApiError> {
    article
        .paragraphs
        .get(index)
        .map(Paragraph::text)
        .ok_or_else(|| {
            ApiError::InvalidInput(format!(
                "Paragraph {index} out of range (article has {})",
                article.paragraphs.len()
            ))
        })
}

#[derive(Deserialize)]
pub struct EditTranslationRequest {
    text: String,
}

/// Store the reader's own translation of a paragraph. Blank text is
/// ignored.
pub async fn edit_translation(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
    Json(req): Json<EditTranslationRequest>,
) -> Result<Json<HistoryItem>, ApiError> {
    validate_history_id(&id)?;
    let mut item = state.history.get(&id).await?;
    paragraph_text(&item.data, index)?;

    let text = req.text.trim();
    if text.is_empty() {
        debug!("Ignoring blank translation edit for {id}/{index}");
        return Ok(Json(item));
    }
    item.data.user_translations.insert(index, text.to_string());
    Ok(Json(state.history.update(&id, &item.data).await?))
}

/// Translation of one paragraph, reusing a stored one when present.
pub async fn fetch_translation(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<TranslateResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_history_id(&id)?;
    let mut item = state.history.get(&id).await?;
    let text = paragraph_text(&item.data, index)?;

    if let Some(existing) = item.data.user_translations.get(&index) {
        return Ok(Json(TranslateResponse {
            translation: existing.clone(),
            cached: true,
        }));
    }

    let settings = state.current_settings().await;
    let translation = state.llm.translate(&settings, &text).await?;
    item.data.user_translations.insert(index, translation.clone());
    state.history.update(&id, &item.data).await?;
    Ok(Json(TranslateResponse {
        translation,
        cached: false,
    }))
}

#[derive(Deserialize)]
pub struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
pub struct ChatResponse {
    reply: ChatMessage,
    history: Vec<ChatMessage>,
}

pub async fn chat_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_history_id(&id)?;
    validate_text("Message", &req.message, MAX_CHAT_LENGTH)?;

    let mut item = state.history.get(&id).await?;
    let settings = state.current_settings().await;
    let message = req.message.trim();
    let answer = state
        .llm
        .chat(&settings, message, &item.data, &item.data.chat_history)
        .await?;

    let reply = ChatMessage::new(ChatRole::Ai, answer);
    item.data.chat_history.push(ChatMessage::new(ChatRole::User, message));
    item.data.chat_history.push(reply.clone());
    let item = state.history.update(&id, &item.data).await?;
    Ok(Json(ChatResponse {
        reply,
        history: item.data.chat_history,
    }))
}
