use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use article_core::{LlmError, StoreError};

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("TTS error: {0}")]
    TtsError(#[from] anyhow::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Llm(e) => {
                tracing::error!("LLM error: {}", e);
                let status = match &e {
                    LlmError::MissingApiKey => StatusCode::BAD_REQUEST,
                    LlmError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    LlmError::Provider { status: 429, .. } => StatusCode::TOO_MANY_REQUESTS,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, e.user_message())
            }
            ApiError::TtsError(e) => {
                tracing::error!("TTS error: {:#}", e);
                (StatusCode::BAD_GATEWAY, format!("TTS error: {}", e))
            }
            ApiError::Store(StoreError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, format!("History item not found: {id}"))
            }
            ApiError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_404() {
        let response = ApiError::from(StoreError::NotFound("abc".into())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_errors_keep_user_guidance() {
        let response = ApiError::from(LlmError::MissingApiKey).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let limited = LlmError::Provider {
            status: 429,
            body: String::new(),
        };
        assert_eq!(
            ApiError::from(limited).into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
