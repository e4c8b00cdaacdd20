//! Glue between a provider chunk stream and the structural parser.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::ChunkStream;
use crate::error::LlmError;
use crate::model::Article;
use crate::stream_parser::{StreamEvent, StreamParser};

/// Feed `chunks` through a fresh [`StreamParser`] and forward every event to
/// `tx`, ending with [`StreamEvent::End`].
///
/// A provider error stops the pipeline and is returned without sending
/// `End`; events already forwarded stay valid. A closed receiver stops the
/// pipeline quietly. Returns the number of paragraphs forwarded.
pub async fn drive(mut chunks: ChunkStream, tx: mpsc::Sender<StreamEvent>) -> Result<usize, LlmError> {
    let mut parser = StreamParser::new();
    let mut fragments = 0usize;

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        fragments += 1;
        for event in parser.push(&chunk) {
            if tx.send(event).await.is_err() {
                debug!("event receiver dropped after {fragments} fragments, stopping");
                return Ok(parser.emitted_paragraphs());
            }
        }
    }

    for event in parser.finish() {
        if tx.send(event).await.is_err() {
            break;
        }
    }
    info!(
        "Generation stream complete: {} fragments, {} paragraphs ({} objects)",
        fragments,
        parser.emitted_paragraphs(),
        parser.objects_found()
    );
    Ok(parser.emitted_paragraphs())
}

/// Builds an [`Article`] out of parser events.
#[derive(Debug, Default)]
pub struct ArticleAssembler {
    article: Article,
    ended: bool,
}

impl ArticleAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns the index of a newly appended paragraph.
    pub fn apply(&mut self, event: StreamEvent) -> Option<usize> {
        match event {
            StreamEvent::Meta(meta) => {
                self.article.title = meta.title;
                self.article.summary = meta.summary;
                None
            }
            StreamEvent::Paragraph(paragraph) => {
                self.article.paragraphs.push(paragraph);
                Some(self.article.paragraphs.len() - 1)
            }
            StreamEvent::End => {
                self.ended = true;
                None
            }
        }
    }

    pub fn article(&self) -> &Article {
        &self.article
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn into_article(self) -> Article {
        self.article
    }
}
