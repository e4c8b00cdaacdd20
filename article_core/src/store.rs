//! Bounded, newest-first history of generated articles kept in a JSON file.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::Article;

/// Maximum number of articles kept.
pub const MAX_HISTORY: usize = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("history item not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: Article,
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All items, newest first. An unreadable file reads as empty.
    pub async fn list(&self) -> Vec<HistoryItem> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn get(&self, id: &str) -> Result<HistoryItem, StoreError> {
        self.list()
            .await
            .into_iter()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Save an article at the front of the history.
    ///
    /// An existing entry with the same title is replaced and its id reused;
    /// the list is then truncated to [`MAX_HISTORY`].
    pub async fn save(&self, article: &Article) -> Result<HistoryItem, StoreError> {
        let _guard = self.lock.lock().await;
        let history = self.read().await;

        let id = history
            .iter()
            .find(|h| h.data.title == article.title)
            .map(|h| h.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let item = HistoryItem {
            id,
            timestamp: Utc::now().timestamp_millis(),
            data: article.clone(),
        };

        let mut updated = Vec::with_capacity(history.len() + 1);
        updated.push(item.clone());
        updated.extend(history.into_iter().filter(|h| h.data.title != article.title));
        updated.truncate(MAX_HISTORY);

        self.write(&updated).await?;
        debug!("Saved '{}' to history ({} items)", article.title, updated.len());
        Ok(item)
    }

    /// Replace the article stored under `id`, keeping its position.
    pub async fn update(&self, id: &str, article: &Article) -> Result<HistoryItem, StoreError> {
        let _guard = self.lock.lock().await;
        let mut history = self.read().await;
        let item = history
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        item.data = article.clone();
        let updated = item.clone();
        self.write(&history).await?;
        Ok(updated)
    }

    /// Remove an item; returns the remaining history.
    pub async fn delete(&self, id: &str) -> Result<Vec<HistoryItem>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut history = self.read().await;
        let before = history.len();
        history.retain(|h| h.id != id);
        if history.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.write(&history).await?;
        Ok(history)
    }

    async fn read(&self) -> Vec<HistoryItem> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to load history from {}: {e}", self.path.display());
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<HistoryItem>>(&text) {
            Ok(mut items) => {
                items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                items
            }
            Err(e) => {
                warn!("Failed to parse history {}: {e}", self.path.display());
                Vec::new()
            }
        }
    }

    async fn write(&self, items: &[HistoryItem]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let text = serde_json::to_string(items)?;
        tokio::fs::write(&self.path, text).await?;
        Ok(())
    }
}
