//! Remote speech synthesis.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, info};

use article_core::{Settings, TtsProvider};

use crate::audio::{AudioClip, PCM_SAMPLE_RATE};

pub const TTS_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of asking for a paragraph's audio.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechOutput {
    Remote(AudioClip),
    /// No remote synthesis configured; speak with the on-device voice.
    Device,
}

/// Source of paragraph audio.
#[async_trait]
pub trait SpeechFetcher: Send + Sync + 'static {
    async fn fetch(&self, text: &str) -> anyhow::Result<SpeechOutput>;
}

/// Gemini or OpenAI text-to-speech over HTTP.
#[derive(Debug, Clone)]
pub struct SpeechClient {
    http: reqwest::Client,
    settings: Settings,
    timeout: Duration,
}

impl SpeechClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
            timeout: TTS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn gemini(&self, api_key: &str, text: &str) -> anyhow::Result<AudioClip> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.gemini_base(),
            self.settings.tts_model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.settings.tts_voice } }
                }
            }
        });
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .context("TTS request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("TTS provider returned {status}");
        }
        let value: Value = response.json().await.context("invalid TTS response")?;
        let b64 = value
            .pointer("/candidates/0/content/parts/0/inlineData/data")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("no audio in TTS response"))?;
        let bytes = general_purpose::STANDARD
            .decode(b64)
            .context("invalid base64 audio")?;
        AudioClip::from_pcm16_le(&bytes, PCM_SAMPLE_RATE)
    }

    async fn openai(&self, api_key: &str, text: &str) -> anyhow::Result<AudioClip> {
        let url = format!("{}/audio/speech", self.settings.chat_base_url());
        let body = json!({
            "model": self.settings.tts_model,
            "input": text,
            "voice": self.settings.tts_voice,
            "response_format": "pcm",
        });
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .context("TTS request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("TTS provider returned {status}");
        }
        let bytes = response.bytes().await.context("failed to read TTS audio")?;
        if bytes.starts_with(b"RIFF") {
            return AudioClip::from_wav(&bytes);
        }
        AudioClip::from_pcm16_le(&bytes, PCM_SAMPLE_RATE)
    }
}

#[async_trait]
impl SpeechFetcher for SpeechClient {
    async fn fetch(&self, text: &str) -> anyhow::Result<SpeechOutput> {
        let provider = self.settings.tts_provider;
        let Some(api_key) = self
            .settings
            .effective_api_key()
            .filter(|_| provider != TtsProvider::Browser)
        else {
            debug!("No remote TTS configured, using device voice");
            return Ok(SpeechOutput::Device);
        };

        let synth = async {
            if provider == TtsProvider::Gemini {
                self.gemini(&api_key, text).await
            } else {
                self.openai(&api_key, text).await
            }
        };
        let clip = tokio::time::timeout(self.timeout, synth)
            .await
            .map_err(|_| anyhow!("TTS timed out after {}s", self.timeout.as_secs()))??;
        info!(
            "Synthesized {} chars into {:.1}s of audio",
            text.chars().count(),
            clip.duration().as_secs_f32()
        );
        Ok(SpeechOutput::Remote(clip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn browser_provider_speaks_on_device() {
        let client = SpeechClient::new(Settings {
            tts_provider: TtsProvider::Browser,
            api_key: "key".into(),
            ..Settings::default()
        });
        assert_eq!(client.fetch("こんにちは").await.unwrap(), SpeechOutput::Device);
    }

    #[tokio::test]
    async fn unreachable_provider_is_an_error() {
        let client = SpeechClient::new(Settings {
            tts_provider: TtsProvider::OpenAi,
            api_key: "key".into(),
            base_url: "http://127.0.0.1:9".into(),
            ..Settings::default()
        });
        assert!(client.fetch("こんにちは").await.is_err());
    }
}
