pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod models;
pub mod ollama;
pub mod orchestrator;
pub mod prompt;
pub mod reference;
pub mod report;
pub mod retrieval;
pub mod session;
pub mod stores;
pub mod traits;

pub use chunking::{chunk_document, concatenate_pages, ChunkingConfig, PAGE_SEPARATOR};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
pub use error::{AuditError, CapabilityError, ExtractError};
pub use extractor::{extract_page_texts, LopdfExtractor, PdfExtractor};
pub use generation::{Generator, OllamaGenerator, DEFAULT_GENERATION_MODEL};
pub use models::{
    AuditOptions, AuditReport, AuditWarning, Chunk, Document, DocumentRole, IndexedChunk, Page,
    ScoredChunk, DEFAULT_AUDIT_QUERY,
};
pub use ollama::{OllamaClient, DEFAULT_OLLAMA_URL, DEFAULT_TIMEOUT_SECS};
pub use orchestrator::{AuditPipeline, AuditStage};
pub use prompt::{build_audit_prompt, join_context, NO_DISCREPANCIES};
pub use reference::{trim_reference, DEFAULT_REFERENCE_MAX_CHARS};
pub use report::{parse_discrepancies, reports_no_discrepancies, Discrepancy};
pub use retrieval::{maximal_marginal_relevance, retrieve, RetrievalConfig};
pub use session::SessionId;
pub use stores::{DiskIndexService, MemoryIndexService, QdrantStore};
pub use traits::VectorIndexService;
