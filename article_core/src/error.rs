use std::time::Duration;

use thiserror::Error;

/// Failures talking to a language-model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API key is not configured")]
    MissingApiKey,

    #[error("request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("provider stream error: {0}")]
    Stream(String),

    #[error("malformed stream line: {0}")]
    MalformedStream(String),

    #[error("provider returned no content")]
    EmptyResponse,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Guidance shown to the reader when a generation fails.
    pub fn user_message(&self) -> String {
        match self {
            LlmError::MissingApiKey => {
                "Please configure a valid API key in the settings.".to_string()
            }
            LlmError::Provider { status: 401, .. } | LlmError::Provider { status: 403, .. } => {
                "The API key is invalid or has expired.".to_string()
            }
            LlmError::Provider { status: 429, .. } => {
                "Too many requests, please wait a moment and try again.".to_string()
            }
            LlmError::Http(e) if e.is_connect() || e.is_request() => {
                "Network connection failed, please check your network or proxy settings."
                    .to_string()
            }
            LlmError::Timeout(d) => format!(
                "Request timed out ({}s). Please check your network connection or API key balance.",
                d.as_secs()
            ),
            other => format!("Generation was interrupted: {other}"),
        }
    }
}

/// Race `fut` against a wall-clock limit.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, LlmError>
where
    F: std::future::Future<Output = Result<T, LlmError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout(limit)),
    }
}
