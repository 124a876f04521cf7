use crate::error::AuditError;
use crate::models::{AuditOptions, Chunk, Document};
use sha2::{Digest, Sha256};

/// Joins consecutive non-blank pages so that page breaks read as paragraph breaks.
pub const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self::from(&AuditOptions::default())
    }
}

impl From<&AuditOptions> for ChunkingConfig {
    fn from(value: &AuditOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.max_chars == 0 || self.overlap_chars >= self.max_chars {
            return Err(AuditError::InvalidConfig(format!(
                "chunk overlap {} must be smaller than a positive chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Character range of one chunk within the concatenated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    fn ends_at(self, chars: &[char], cut: usize) -> bool {
        if cut == 0 {
            return false;
        }
        let last = chars[cut - 1];
        match self {
            Self::Paragraph => cut >= 2 && last == '\n' && chars[cut - 2] == '\n',
            Self::Line => last == '\n',
            Self::Sentence => {
                cut >= 2 && last.is_whitespace() && matches!(chars[cut - 2], '.' | '!' | '?')
            }
            Self::Word => last.is_whitespace(),
        }
    }
}

/// Concatenated suspect text plus the starting character offset of every page in it.
pub fn concatenate_pages(document: &Document) -> (String, Vec<(usize, u32)>) {
    let mut text = String::new();
    let mut offsets = Vec::new();
    let mut cursor = 0usize;

    for page in document.pages.iter().filter(|page| !page.text.trim().is_empty()) {
        if !text.is_empty() {
            text.push_str(PAGE_SEPARATOR);
            cursor += PAGE_SEPARATOR.chars().count();
        }
        offsets.push((cursor, page.number));
        text.push_str(&page.text);
        cursor += page.text.chars().count();
    }

    (text, offsets)
}

/// Splits `chars` into spans no longer than `max_chars`. Every span after the
/// first starts with the last `overlap_chars` characters of its predecessor.
pub fn split_spans(chars: &[char], config: ChunkingConfig) -> Vec<ChunkSpan> {
    let mut spans = Vec::new();
    if chars.iter().all(|c| c.is_whitespace()) {
        return spans;
    }

    let mut start = 0usize;
    let mut overlap = 0usize;
    loop {
        let end = (start + config.max_chars).min(chars.len());
        let cut = find_cut(chars, start, end, config);
        spans.push(ChunkSpan {
            start,
            end: cut,
            overlap,
        });

        if cut >= chars.len() {
            break;
        }
        start = cut - config.overlap_chars;
        overlap = config.overlap_chars;
    }

    spans
}

fn find_cut(chars: &[char], start: usize, end: usize, config: ChunkingConfig) -> usize {
    if end == chars.len() {
        return end;
    }

    // The cut must leave more than `overlap_chars` behind it or the next span
    // would not advance.
    let floor = start + config.overlap_chars + 1;
    let preferred_floor = floor.max(start + config.max_chars / 2);

    for boundary in [Boundary::Paragraph, Boundary::Line, Boundary::Sentence] {
        if let Some(cut) = last_boundary(chars, preferred_floor, end, boundary) {
            return cut;
        }
    }

    last_boundary(chars, floor, end, Boundary::Word).unwrap_or(end)
}

fn last_boundary(chars: &[char], low: usize, high: usize, boundary: Boundary) -> Option<usize> {
    if low > high {
        return None;
    }
    (low..=high).rev().find(|&cut| boundary.ends_at(chars, cut))
}

pub fn chunk_document(document: &Document, config: ChunkingConfig) -> Result<Vec<Chunk>, AuditError> {
    config.validate()?;

    let (text, page_offsets) = concatenate_pages(document);
    let chars: Vec<char> = text.chars().collect();

    let chunks = split_spans(&chars, config)
        .into_iter()
        .enumerate()
        .map(|(index, span)| {
            let text: String = chars[span.start..span.end].iter().collect();
            Chunk {
                chunk_id: make_chunk_id(&document.source_path, index as u64, &text),
                chunk_index: index as u64,
                start_char: span.start,
                overlap_chars: span.overlap,
                page_start: page_at(&page_offsets, span.start),
                page_end: page_at(&page_offsets, span.end.saturating_sub(1)),
                text,
            }
        })
        .collect();

    Ok(chunks)
}

fn page_at(page_offsets: &[(usize, u32)], position: usize) -> u32 {
    page_offsets
        .iter()
        .take_while(|(offset, _)| *offset <= position)
        .last()
        .or_else(|| page_offsets.first())
        .map(|(_, number)| *number)
        .unwrap_or(0)
}

fn make_chunk_id(source_path: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
