use crate::error::ExtractError;
use crate::models::{Document, Page};
use std::path::Path;
use tracing::debug;

pub trait PdfExtractor: Send + Sync {
    fn extract_document(&self, path: &Path) -> Result<Document, ExtractError>;
}

/// Text-layer extraction with `lopdf`. Pages without a decodable text layer
/// are kept as empty pages so page numbering stays aligned with the file.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_document(&self, path: &Path) -> Result<Document, ExtractError> {
        let bytes = std::fs::read(path)?;
        let pages = extract_page_texts(&bytes)?;
        Ok(Document::new(path.to_string_lossy(), pages))
    }
}

pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<Page>, ExtractError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|error| ExtractError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = match document.extract_text(&[page_no]) {
            Ok(text) => text,
            Err(error) => {
                debug!(page = page_no, error = %error, "page has no decodable text");
                String::new()
            }
        };
        pages.push(Page {
            number: page_no,
            text,
        });
    }

    Ok(pages)
}
