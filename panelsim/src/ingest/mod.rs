//! Document Ingestion
//!
//! Turns an uploaded PDF buffer into a lazy sequence of positioned text
//! blocks. Nothing here touches persistent storage.
//!
//! ```text
//! bytes ──▶ Ingestor::open ──▶ PdfDocument ──▶ text_blocks() ──▶ TextBlock, TextBlock, ...
//!            (size, header,      (pages          (one page decoded
//!             page limit)         known)          per step, cancel
//!                                                 checked between)
//! ```

mod content;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use lopdf::content::Content;
use lopdf::{Document, ObjectId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::config::ImportOptions;
use content::TextExtractor;

/// The PDF header must appear within this many leading bytes.
const HEADER_SEARCH_WINDOW: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    #[error("Unreadable document: {0}")]
    UnreadableDocument(String),
    #[error("Document contains no extractable text")]
    EmptyDocument,
    #[error("Document has {pages} pages, limit is {limit}")]
    PageLimitExceeded { pages: usize, limit: usize },
    #[error("Document is {bytes} bytes, limit is {limit}")]
    DocumentTooLarge { bytes: usize, limit: usize },
    #[error("Ingestion cancelled")]
    Cancelled,
}

/// A run of text found on a page, in PDF user-space coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub text: String,
}

impl TextBlock {
    pub fn new(page: u32, x: f64, y: f64, text: impl Into<String>) -> Self {
        Self {
            page,
            x,
            y,
            text: text.into(),
        }
    }
}

/// Entry point for PDF ingestion
#[derive(Debug, Clone, Default)]
pub struct Ingestor {
    options: ImportOptions,
}

impl Ingestor {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    /// Validate and load a PDF buffer. Pages are not decoded yet.
    pub fn open(&self, bytes: &[u8]) -> Result<PdfDocument, IngestError> {
        if bytes.len() > self.options.max_bytes {
            return Err(IngestError::DocumentTooLarge {
                bytes: bytes.len(),
                limit: self.options.max_bytes,
            });
        }
        if !has_pdf_header(bytes) {
            return Err(IngestError::UnreadableDocument(
                "missing %PDF- header".to_string(),
            ));
        }

        let document = guarded(|| Document::load_mem(bytes))?
            .map_err(|e| IngestError::UnreadableDocument(e.to_string()))?;
        if document.is_encrypted() {
            return Err(IngestError::UnreadableDocument(
                "document is encrypted".to_string(),
            ));
        }

        let pages: Vec<(u32, ObjectId)> = document.get_pages().into_iter().collect();
        if pages.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        if pages.len() > self.options.max_pages {
            return Err(IngestError::PageLimitExceeded {
                pages: pages.len(),
                limit: self.options.max_pages,
            });
        }

        tracing::info!(
            "Opened PDF with {} pages ({} bytes)",
            pages.len(),
            bytes.len()
        );
        Ok(PdfDocument { document, pages })
    }

    /// Open and drain the block sequence in one go.
    pub fn extract(&self, bytes: &[u8], cancel: &CancelToken) -> Result<Vec<TextBlock>, IngestError> {
        let document = self.open(bytes)?;
        document.text_blocks(cancel).collect()
    }
}

/// A loaded PDF whose pages are decoded on demand
#[derive(Debug)]
pub struct PdfDocument {
    document: Document,
    pages: Vec<(u32, ObjectId)>,
}

impl PdfDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Lazy block sequence in document order (page, then content order).
    ///
    /// Yields `Err(EmptyDocument)` as its last item when no page produced
    /// any text, and stops after the first error.
    pub fn text_blocks(&self, cancel: &CancelToken) -> TextBlocks<'_> {
        TextBlocks {
            document: self,
            cancel: cancel.clone(),
            next_page: 0,
            pending: VecDeque::new(),
            yielded_any: false,
            finished: false,
        }
    }

    fn decode_page(&self, page_number: u32, page_id: ObjectId) -> Result<Vec<TextBlock>, IngestError> {
        let data = self
            .document
            .get_page_content(page_id)
            .map_err(|e| IngestError::UnreadableDocument(format!("page {}: {}", page_number, e)))?;
        let content = guarded(|| Content::decode(&data))?.map_err(|e| {
            IngestError::UnreadableDocument(format!("page {} content: {}", page_number, e))
        })?;

        let blocks = TextExtractor::new(page_number).run(&content.operations);
        tracing::debug!("Page {}: {} text blocks", page_number, blocks.len());
        Ok(blocks)
    }
}

/// Iterator returned by [`PdfDocument::text_blocks`]
pub struct TextBlocks<'a> {
    document: &'a PdfDocument,
    cancel: CancelToken,
    next_page: usize,
    pending: VecDeque<TextBlock>,
    yielded_any: bool,
    finished: bool,
}

impl Iterator for TextBlocks<'_> {
    type Item = Result<TextBlock, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(block) = self.pending.pop_front() {
                self.yielded_any = true;
                return Some(Ok(block));
            }
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finished = true;
                return Some(Err(IngestError::Cancelled));
            }
            let Some(&(page_number, page_id)) = self.document.pages.get(self.next_page) else {
                self.finished = true;
                if self.yielded_any {
                    return None;
                }
                return Some(Err(IngestError::EmptyDocument));
            };
            self.next_page += 1;

            match self.document.decode_page(page_number, page_id) {
                Ok(blocks) => self.pending.extend(blocks),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Run third-party parsing code, turning a panic on hostile input into a
/// structured error.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, IngestError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| {
        tracing::warn!("PDF parser panicked on malformed input");
        IngestError::UnreadableDocument("malformed PDF structure".to_string())
    })
}
