use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One annotated word or particle of an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub surface: String,
    /// Furigana; absent when the surface is already kana.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading: Option<String>,
    #[serde(default)]
    pub is_target: bool,
    #[serde(default)]
    pub is_difficult: bool,
    /// Chinese gloss, only present on target words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub tokens: Vec<Token>,
}

impl Paragraph {
    /// Plain text of the paragraph (all surfaces concatenated).
    pub fn text(&self) -> String {
        self.tokens.iter().map(|t| t.surface.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
        }
    }
}

/// Title and summary, extracted once per generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleMeta {
    pub title: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub summary: String,
    pub paragraphs: Vec<Paragraph>,
    #[serde(default)]
    pub user_translations: BTreeMap<usize, String>,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

impl Article {
    /// Paragraph texts joined by newlines, used as chat context.
    pub fn plain_text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Only articles with at least one paragraph are worth keeping.
    pub fn is_persistable(&self) -> bool {
        !self.paragraphs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JlptLevel {
    N5,
    N4,
    N3,
    N2,
    N1,
}

impl fmt::Display for JlptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JlptLevel::N5 => "N5",
            JlptLevel::N4 => "N4",
            JlptLevel::N3 => "N3",
            JlptLevel::N2 => "N2",
            JlptLevel::N1 => "N1",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Story,
    Essay,
    Dialogue,
    Poem,
    News,
}

impl Genre {
    /// Label used inside the generation prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Genre::Story => "小说/故事",
            Genre::Essay => "评论/随笔",
            Genre::Dialogue => "播客/对话",
            Genre::Poem => "诗歌/俳句",
            Genre::News => "新闻报道",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub level: JlptLevel,
    pub genre: Genre,
    pub topic: String,
}

// Minified wire shape the model is asked to produce.

#[derive(Debug, Deserialize)]
pub(crate) struct RawToken {
    w: String,
    #[serde(default)]
    r: Option<String>,
    #[serde(default)]
    tg: Option<bool>,
    #[serde(default)]
    d: Option<bool>,
    #[serde(default)]
    m: Option<String>,
    #[serde(default)]
    a: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawParagraph {
    ts: Vec<RawToken>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMeta {
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
}

impl From<RawToken> for Token {
    fn from(raw: RawToken) -> Self {
        Token {
            surface: raw.w,
            reading: raw.r.filter(|r| !r.is_empty()),
            is_target: raw.tg.unwrap_or(false),
            is_difficult: raw.d.unwrap_or(false),
            meaning: raw.m,
            advice: raw.a,
        }
    }
}

impl From<RawParagraph> for Paragraph {
    fn from(raw: RawParagraph) -> Self {
        Paragraph {
            tokens: raw.ts.into_iter().map(Token::from).collect(),
        }
    }
}

impl RawMeta {
    pub(crate) fn into_meta(self) -> Option<ArticleMeta> {
        match (self.t, self.s) {
            (Some(title), Some(summary)) if !title.is_empty() && !summary.is_empty() => {
                Some(ArticleMeta { title, summary })
            }
            _ => None,
        }
    }
}
