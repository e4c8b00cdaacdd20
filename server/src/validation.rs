use article_core::{GenerateRequest, Settings};

use crate::error::ApiError;

/// Maximum text length for translate and TTS requests
pub const MAX_TEXT_LENGTH: usize = 5000;
/// Maximum length of a generation topic
pub const MAX_TOPIC_LENGTH: usize = 200;
/// Maximum length of a looked-up word
pub const MAX_WORD_LENGTH: usize = 50;
/// Maximum length of a chat message
pub const MAX_CHAT_LENGTH: usize = 2000;

/// Reject empty or overlong text. Lengths are counted in characters.
pub fn validate_text(field: &str, text: &str, max: usize) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{field} cannot be empty")));
    }
    let len = text.chars().count();
    if len > max {
        return Err(ApiError::InvalidInput(format!(
            "{field} too long (max {max} characters)"
        )));
    }
    Ok(())
}

pub fn validate_generate_request(req: &GenerateRequest) -> Result<(), ApiError> {
    validate_text("Topic", &req.topic, MAX_TOPIC_LENGTH)
}

/// Validate history item id format (UUID-like)
pub fn validate_history_id(id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > 64 {
        return Err(ApiError::InvalidInput("Invalid history id length".to_string()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ApiError::InvalidInput(
            "History id may only contain letters, digits and '-'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_settings(settings: &Settings) -> Result<(), ApiError> {
    for (field, url) in [
        ("baseUrl", &settings.base_url),
        ("geminiBaseUrl", &settings.gemini_base_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ApiError::InvalidInput(format!(
                "{field} must start with http:// or https://"
            )));
        }
    }
    if settings.model.trim().is_empty() {
        return Err(ApiError::InvalidInput("model cannot be empty".to_string()));
    }
    Ok(())
}
