//! Server-Sent-Events framing for streamed chat completions.
//!
//! Network reads split the body at arbitrary byte offsets, including inside
//! multi-byte UTF-8 sequences, so the decoder buffers raw bytes and only
//! decodes complete lines.

use serde_json::Value;

/// One decoded `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Payload(String),
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning the `data:` payloads of every line completed
    /// by them. Comments, `event:`/`id:` fields and blank lines are dropped.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseData> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = parse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseData> {
        let rest = std::mem::take(&mut self.pending);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<SseData> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    if data.is_empty() {
        return None;
    }
    Some(SseData::Payload(data.to_string()))
}

/// Text delta of an OpenAI-compatible `chat.completion.chunk`.
pub fn openai_delta(chunk: &Value) -> Option<&str> {
    chunk
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Concatenated text parts of a Gemini `GenerateContentResponse` chunk.
pub fn gemini_delta(chunk: &Value) -> Option<String> {
    let parts = chunk.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Error object some providers send inside the event stream.
pub fn stream_error(chunk: &Value) -> Option<String> {
    let err = chunk.get("error")?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    Some(message)
}
