use crate::error::CapabilityError;
use crate::models::{Chunk, ScoredChunk};
use crate::session::SessionId;
use async_trait::async_trait;

/// Caller-owned handle to a vector store that can hold many isolated sessions.
#[async_trait]
pub trait VectorIndexService: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Fails if the session already exists.
    async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError>;

    async fn index_chunks(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), CapabilityError>;

    /// Up to `limit` chunks ordered by descending similarity, each with its
    /// stored embedding.
    async fn nearest(
        &self,
        session: &SessionId,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CapabilityError>;

    async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError>;
}

#[async_trait]
impl<T> VectorIndexService for Box<T>
where
    T: VectorIndexService + ?Sized,
{
    fn backend(&self) -> &'static str {
        (**self).backend()
    }

    async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        (**self).open_session(session).await
    }

    async fn index_chunks(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), CapabilityError> {
        (**self).index_chunks(session, chunks, embeddings).await
    }

    async fn nearest(
        &self,
        session: &SessionId,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CapabilityError> {
        (**self).nearest(session, query_vector, limit).await
    }

    async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        (**self).release_session(session).await
    }
}

pub(crate) fn check_embedding_shape(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
) -> Result<Option<usize>, CapabilityError> {
    if chunks.len() != embeddings.len() {
        return Err(CapabilityError::Request(format!(
            "embedding count {} doesn't match chunk count {}",
            embeddings.len(),
            chunks.len()
        )));
    }

    let dimensions = match embeddings.first() {
        Some(first) => first.len(),
        None => return Ok(None),
    };
    if let Some(bad) = embeddings.iter().find(|vector| vector.len() != dimensions) {
        return Err(CapabilityError::Request(format!(
            "embedding dimension {} != {}",
            bad.len(),
            dimensions
        )));
    }

    Ok(Some(dimensions))
}
