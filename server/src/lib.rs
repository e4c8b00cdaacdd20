pub mod config;
pub mod error;
pub mod handlers;
pub mod validation;

use std::convert::Infallible;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post, put},
    Router,
};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tracing::{info, warn};

use article_core::{HistoryStore, LlmClient, Settings, SettingsStore};

use crate::config::ServerConfig;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub(crate) static START_TIME: OnceLock<Instant> = OnceLock::new();

#[derive(Clone)]
pub struct AppState {
    pub llm: LlmClient,
    pub settings: Arc<RwLock<Settings>>,
    pub settings_store: Arc<SettingsStore>,
    pub history: Arc<HistoryStore>,
    pub request_count: Arc<AtomicU64>,
    pub generation_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, settings: Settings) -> Self {
        Self {
            llm: LlmClient::new(config.llm_timeout()),
            settings: Arc::new(RwLock::new(settings)),
            settings_store: Arc::new(SettingsStore::new(config.settings_path())),
            history: Arc::new(HistoryStore::new(config.history_path())),
            request_count: Arc::new(AtomicU64::new(0)),
            generation_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Load stored settings from the data directory and apply environment
    /// overrides.
    pub async fn load(config: ServerConfig) -> Self {
        let settings = SettingsStore::new(config.settings_path())
            .load()
            .await
            .with_env_overrides();
        info!(
            "Settings loaded: provider={:?} model={} tts={:?}",
            settings.llm_provider, settings.model, settings.tts_provider
        );
        Self::new(config, settings)
    }

    pub async fn current_settings(&self) -> Settings {
        self.settings.read().await.clone()
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header {
        request.headers_mut().insert("x-request-id", value.clone());
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];
    let permissive = || {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods.clone())
            .allow_headers(Any)
            .allow_credentials(false)
    };

    match &config.cors_allowed_origins {
        Some(allowed) => {
            let origins: Vec<HeaderValue> = allowed.iter().filter_map(|o| o.parse().ok()).collect();
            if origins.is_empty() {
                warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
                permissive()
            } else {
                info!("CORS configured for {} origin(s)", origins.len());
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(methods.clone())
                    .allow_headers(Any)
                    .allow_credentials(false)
            }
        }
        None => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
            permissive()
        }
    }
}

/// Build the full application: routes at the root and under `/api`, plus
/// tracing, rate limiting, body limit and CORS layers.
///
/// The request timeout only wraps routes that never call a provider; provider
/// calls are bounded by the LLM timeout.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let _ = START_TIME.get_or_init(Instant::now);
    let config = state.config.clone();

    // Using GlobalKeyExtractor to rate limit globally (all requests share the same limit)
    let per_request_ms = (60_000 / u64::from(config.rate_limit_per_minute.max(1))).max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_request_ms)
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors_layer(&config))
        .into_inner();

    let timeout = TimeoutLayer::new(config.request_timeout());

    let local = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route(
            "/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .route("/history", get(handlers::list_history))
        .route(
            "/history/{id}",
            get(handlers::get_history).delete(handlers::delete_history),
        )
        .layer(timeout.clone());

    let provider = Router::new()
        .route("/generate", post(handlers::generate_endpoint))
        .route("/explain", post(handlers::explain_endpoint))
        .route("/translate", post(handlers::translate_endpoint))
        .route("/tts", post(handlers::tts_endpoint))
        .route(
            "/history/{id}/translations/{index}",
            put(handlers::edit_translation)
                .layer::<_, Infallible>(timeout)
                .post(handlers::fetch_translation),
        )
        .route("/history/{id}/chat", post(handlers::chat_endpoint));

    let api = local.merge(provider);

    Ok(Router::new()
        .merge(api.clone()) // root paths
        .nest("/api", api) // /api prefix
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(add_request_id))
        .layer(middleware_stack)
        .with_state(state))
}
