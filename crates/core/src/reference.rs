use crate::models::Document;

pub const REFERENCE_PAGE_SEPARATOR: &str = " ";
pub const DEFAULT_REFERENCE_MAX_CHARS: usize = 8_000;

pub fn concatenate_reference(document: &Document) -> String {
    document
        .pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(REFERENCE_PAGE_SEPARATOR)
}

/// First `max_chars` characters of the reference text. Hard cut, no attempt
/// to stop at a paragraph.
pub fn trim_reference(document: &Document, max_chars: usize) -> String {
    let mut text = concatenate_reference(document);
    if let Some((offset, _)) = text.char_indices().nth(max_chars) {
        text.truncate(offset);
    }
    text
}
