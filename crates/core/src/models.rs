use crate::error::AuditError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_AUDIT_QUERY: &str =
    "Identify all differences in financial terms, quantities, and dates.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentRole {
    Reference,
    Suspect,
}

impl fmt::Display for DocumentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => f.write_str("reference"),
            Self::Suspect => f.write_str("suspect"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    /// Empty when the page had no decodable text.
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub source_path: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(source_path: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            source_path: source_path.into(),
            pages,
        }
    }

    /// Builds a document from raw page strings, numbering pages from 1.
    pub fn from_texts<I, S>(source_path: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pages = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Page {
                number: (index + 1) as u32,
                text: text.into(),
            })
            .collect();
        Self::new(source_path, pages)
    }

    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|page| page.text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_index: u64,
    /// Character offset of the first character in the concatenated text.
    pub start_char: usize,
    /// Number of leading characters repeated from the previous chunk.
    pub overlap_chars: usize,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The part of the chunk that is not shared with its predecessor.
    pub fn core_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap_chars) {
            Some((offset, _)) => &self.text[offset..],
            None => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub retrieval_k: usize,
    pub retrieval_fetch_k: usize,
    pub mmr_lambda: f32,
    pub reference_max_chars: usize,
    pub audit_query: String,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 100,
            retrieval_k: 6,
            retrieval_fetch_k: 10,
            mmr_lambda: 0.5,
            reference_max_chars: crate::reference::DEFAULT_REFERENCE_MAX_CHARS,
            audit_query: DEFAULT_AUDIT_QUERY.to_string(),
        }
    }
}

impl AuditOptions {
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.chunk_max_chars == 0 {
            return Err(AuditError::InvalidConfig(
                "chunk_max_chars must be positive".to_string(),
            ));
        }
        if self.chunk_overlap_chars >= self.chunk_max_chars {
            return Err(AuditError::InvalidConfig(format!(
                "chunk_overlap_chars {} must be smaller than chunk_max_chars {}",
                self.chunk_overlap_chars, self.chunk_max_chars
            )));
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err(AuditError::InvalidConfig(format!(
                "mmr_lambda {} is outside [0, 1]",
                self.mmr_lambda
            )));
        }
        if self.audit_query.trim().is_empty() {
            return Err(AuditError::InvalidConfig("audit_query is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditWarning {
    EmptyDocument { role: DocumentRole, path: String },
}

impl fmt::Display for AuditWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDocument { role, path } => {
                write!(f, "{role} document {path} has no extractable text")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub text: String,
    pub session_id: String,
    pub suspect_chunks: usize,
    pub retrieved_chunks: usize,
    pub warnings: Vec<AuditWarning>,
    pub completed_at: DateTime<Utc>,
}
