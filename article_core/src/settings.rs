//! Provider credentials and model choices, persisted as a small JSON file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::StoreError;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    /// Any OpenAI-compatible endpoint (DeepSeek and friends).
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    Gemini,
    OpenAi,
    /// On-device speech only.
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub llm_provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub gemini_base_url: String,
    pub tts_provider: TtsProvider,
    pub tts_model: String,
    pub tts_voice: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: LlmProvider::Gemini,
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: "gemini-2.5-flash".to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            tts_provider: TtsProvider::Gemini,
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            tts_voice: "Kore".to_string(),
        }
    }
}

impl Settings {
    /// Stored key, else the provider's key from the environment.
    pub fn effective_api_key(&self) -> Option<String> {
        let stored = self.api_key.trim();
        if !stored.is_empty() {
            return Some(stored.to_string());
        }
        let env_key = match self.llm_provider {
            LlmProvider::Gemini => std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .ok(),
            LlmProvider::OpenAi | LlmProvider::Custom => std::env::var("OPENAI_API_KEY").ok(),
        };
        env_key.filter(|k| !k.trim().is_empty())
    }

    /// Base URL without a trailing slash.
    pub fn chat_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn gemini_base(&self) -> &str {
        self.gemini_base_url.trim_end_matches('/')
    }

    /// Apply `LLM_PROVIDER`, `LLM_MODEL` and `LLM_BASE_URL` overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            match provider.trim().to_ascii_lowercase().as_str() {
                "gemini" => self.llm_provider = LlmProvider::Gemini,
                "openai" => self.llm_provider = LlmProvider::OpenAi,
                "custom" => self.llm_provider = LlmProvider::Custom,
                other => warn!("Ignoring unknown LLM_PROVIDER '{other}'"),
            }
        }
        if let Ok(model) = std::env::var("LLM_MODEL") {
            if !model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        self
    }
}

/// JSON file holding one [`Settings`] value.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings; a missing or unreadable file yields the defaults.
    pub async fn load(&self) -> Settings {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", self.path.display());
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!("Failed to read {}: {e}, using defaults", self.path.display());
                Settings::default()
            }
        }
    }

    pub async fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let text = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, text).await?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }
}
