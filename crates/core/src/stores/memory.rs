use crate::error::CapabilityError;
use crate::models::{Chunk, IndexedChunk, ScoredChunk};
use crate::retrieval::rank_by_similarity;
use crate::session::SessionId;
use crate::traits::{check_embedding_shape, VectorIndexService};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local index. Each session is a separate entry list.
#[derive(Debug, Default)]
pub struct MemoryIndexService {
    sessions: RwLock<HashMap<SessionId, Vec<IndexedChunk>>>,
}

impl MemoryIndexService {
    pub async fn open_sessions(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn unknown_session(session: &SessionId) -> CapabilityError {
    CapabilityError::Request(format!("unknown index session {session}"))
}

#[async_trait]
impl VectorIndexService for MemoryIndexService {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session) {
            return Err(CapabilityError::Request(format!(
                "index session {session} already exists"
            )));
        }
        sessions.insert(session.clone(), Vec::new());
        Ok(())
    }

    async fn index_chunks(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), CapabilityError> {
        check_embedding_shape(chunks, embeddings)?;

        let mut sessions = self.sessions.write().await;
        let entries = sessions
            .get_mut(session)
            .ok_or_else(|| unknown_session(session))?;
        entries.extend(
            chunks
                .iter()
                .zip(embeddings.iter())
                .map(|(chunk, embedding)| IndexedChunk {
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                }),
        );
        Ok(())
    }

    async fn nearest(
        &self,
        session: &SessionId,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CapabilityError> {
        let sessions = self.sessions.read().await;
        let entries = sessions.get(session).ok_or_else(|| unknown_session(session))?;
        Ok(rank_by_similarity(entries, query_vector, limit))
    }

    async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        self.sessions
            .write()
            .await
            .remove(session)
            .map(|_| ())
            .ok_or_else(|| unknown_session(session))
    }
}
