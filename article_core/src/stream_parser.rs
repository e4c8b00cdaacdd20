//! Incremental extraction of an article from a streamed, minified JSON
//! document of the shape `{"t":..,"s":..,"ps":[{"ts":[..]}, ..]}`.
//!
//! The document is invalid JSON until the last fragment arrives, so instead
//! of a streaming JSON library the parser keeps the raw text and runs a small
//! two-state scanner (`Normal` / `InString`) over the paragraph array. Every
//! top-level object the scanner closes is parsed on its own and emitted.
//!
//! Metadata is located with a plain substring search for [`PARAGRAPHS_MARKER`].
//! That search is not JSON-aware: any earlier occurrence of the marker text
//! (a nested `ps` key, or unescaped quotes in sloppy model output) is taken
//! as the array key, metadata extraction runs on the wrong prefix and the
//! paragraph scan may start at the wrong bracket. Model output puts `t` and
//! `s` first and never nests objects there, so this is left as a known
//! limitation.

use tracing::{debug, warn};

use crate::model::{ArticleMeta, Paragraph, RawMeta, RawParagraph};
use crate::sanitize::parse_lenient;

/// Literal key that opens the paragraph array.
pub const PARAGRAPHS_MARKER: &str = "\"ps\":";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Meta(ArticleMeta),
    Paragraph(Paragraph),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InString { escaped: bool },
}

/// Resumable position inside the paragraph array.
#[derive(Debug)]
struct ArrayScan {
    cursor: usize,
    depth: u32,
    state: ScanState,
    object_start: Option<usize>,
    closed: bool,
}

impl ArrayScan {
    fn new(cursor: usize) -> Self {
        Self {
            cursor,
            depth: 0,
            state: ScanState::Normal,
            object_start: None,
            closed: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
    marker_at: Option<usize>,
    scan: Option<ArrayScan>,
    meta_emitted: bool,
    objects_found: usize,
    emitted: usize,
    finished: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return whatever became extractable.
    pub fn push(&mut self, fragment: &str) -> Vec<StreamEvent> {
        if self.finished {
            warn!("fragment pushed after end of stream, ignoring {} bytes", fragment.len());
            return Vec::new();
        }
        if fragment.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(fragment);

        let mut events = Vec::new();
        self.locate_array();
        if !self.meta_emitted {
            if let Some(meta) = self.try_meta() {
                debug!("article metadata extracted: {}", meta.title);
                self.meta_emitted = true;
                events.push(StreamEvent::Meta(meta));
            }
        }
        self.scan_paragraphs(&mut events);
        events
    }

    /// Signal end of stream. Returns the terminal [`StreamEvent::End`] the
    /// first time it is called and nothing afterwards.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        if let Some(scan) = &self.scan {
            if scan.object_start.is_some() {
                debug!("stream ended inside paragraph {}, dropping it", self.objects_found + 1);
            }
        }
        vec![StreamEvent::End]
    }

    pub fn meta_emitted(&self) -> bool {
        self.meta_emitted
    }

    /// Number of paragraph events emitted so far.
    pub fn emitted_paragraphs(&self) -> usize {
        self.emitted
    }

    /// Number of complete top-level objects seen in the paragraph array,
    /// including malformed ones that were skipped.
    pub fn objects_found(&self) -> usize {
        self.objects_found
    }

    fn locate_array(&mut self) {
        if self.marker_at.is_none() {
            self.marker_at = self.buffer.find(PARAGRAPHS_MARKER);
        }
        if self.scan.is_none() {
            if let Some(marker) = self.marker_at {
                if let Some(rel) = self.buffer[marker..].find('[') {
                    self.scan = Some(ArrayScan::new(marker + rel + 1));
                }
            }
        }
    }

    fn try_meta(&self) -> Option<ArticleMeta> {
        let marker = self.marker_at?;
        let prefix = self.buffer[..marker].trim();
        let prefix = prefix.strip_suffix(',').unwrap_or(prefix);
        let candidate = format!("{prefix}}}");
        match parse_lenient::<RawMeta>(&candidate) {
            Ok(raw) => raw.into_meta(),
            Err(_) => None,
        }
    }

    fn scan_paragraphs(&mut self, events: &mut Vec<StreamEvent>) {
        let Self {
            buffer,
            scan,
            objects_found,
            emitted,
            ..
        } = self;
        let Some(scan) = scan.as_mut() else {
            return;
        };
        let bytes = buffer.as_bytes();

        while !scan.closed && scan.cursor < bytes.len() {
            let i = scan.cursor;
            let b = bytes[i];
            scan.cursor += 1;

            match scan.state {
                ScanState::InString { escaped: true } => {
                    scan.state = ScanState::InString { escaped: false };
                }
                ScanState::InString { escaped: false } => match b {
                    b'\\' => scan.state = ScanState::InString { escaped: true },
                    b'"' => scan.state = ScanState::Normal,
                    _ => {}
                },
                ScanState::Normal => match b {
                    b'"' => scan.state = ScanState::InString { escaped: false },
                    b'{' => {
                        if scan.depth == 0 {
                            scan.object_start = Some(i);
                        }
                        scan.depth += 1;
                    }
                    b'}' if scan.depth > 0 => {
                        scan.depth -= 1;
                        if scan.depth == 0 {
                            if let Some(start) = scan.object_start.take() {
                                *objects_found += 1;
                                let raw = &buffer[start..=i];
                                match parse_lenient::<RawParagraph>(raw) {
                                    Ok(paragraph) => {
                                        *emitted += 1;
                                        events.push(StreamEvent::Paragraph(paragraph.into()));
                                    }
                                    Err(e) => {
                                        warn!("skipping malformed paragraph {}: {e}", *objects_found);
                                    }
                                }
                            }
                        }
                    }
                    b']' if scan.depth == 0 => scan.closed = true,
                    _ => {}
                },
            }
        }
    }
}
