//! Article generation for the reading tutor: data model, provider client,
//! the incremental parser that turns a streamed JSON document into
//! paragraphs, and the on-disk settings and history stores.

pub mod client;
pub mod error;
pub mod generation;
pub mod model;
pub mod prompt;
pub mod sanitize;
pub mod settings;
pub mod sse;
pub mod store;
pub mod stream_parser;

pub use client::{ChunkStream, LlmClient, TokenExplanation};
pub use error::LlmError;
pub use generation::{drive, ArticleAssembler};
pub use model::{
    Article, ArticleMeta, ChatMessage, ChatRole, GenerateRequest, Genre, JlptLevel, Paragraph, Token,
};
pub use settings::{LlmProvider, Settings, SettingsStore, TtsProvider};
pub use store::{HistoryItem, HistoryStore, StoreError, MAX_HISTORY};
pub use stream_parser::{StreamEvent, StreamParser};
