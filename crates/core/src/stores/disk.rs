use crate::error::CapabilityError;
use crate::models::{Chunk, IndexedChunk, ScoredChunk};
use crate::retrieval::rank_by_similarity;
use crate::session::SessionId;
use crate::traits::{check_embedding_shape, VectorIndexService};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const ENTRIES_FILE: &str = "entries.json";

/// Persists each session as a JSON file in its own directory under `root`.
/// The directory is removed when the session is released.
#[derive(Debug, Clone)]
pub struct DiskIndexService {
    root: PathBuf,
}

impl DiskIndexService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session: &SessionId) -> PathBuf {
        self.root.join(session.as_str())
    }

    async fn read_entries(&self, session: &SessionId) -> Result<Vec<IndexedChunk>, CapabilityError> {
        let dir = self.session_dir(session);
        let bytes = match fs::read(dir.join(ENTRIES_FILE)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if fs::try_exists(&dir).await? {
                    return Ok(Vec::new());
                }
                return Err(CapabilityError::Request(format!(
                    "unknown index session {session}"
                )));
            }
            Err(error) => return Err(error.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(unix)]
async fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await
}

#[cfg(not(unix))]
async fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl VectorIndexService for DiskIndexService {
    fn backend(&self) -> &'static str {
        "disk"
    }

    async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        fs::create_dir_all(&self.root).await?;
        let dir = self.session_dir(session);
        // create_dir fails on an existing path, which catches namespace collisions.
        fs::create_dir(&dir).await?;

        if let Err(error) = restrict_to_owner(&dir).await {
            let _ = fs::remove_dir_all(&dir).await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn index_chunks(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), CapabilityError> {
        check_embedding_shape(chunks, embeddings)?;

        let mut entries = self.read_entries(session).await?;
        entries.extend(
            chunks
                .iter()
                .zip(embeddings.iter())
                .map(|(chunk, embedding)| IndexedChunk {
                    chunk: chunk.clone(),
                    embedding: embedding.clone(),
                }),
        );

        let payload = serde_json::to_vec(&entries)?;
        fs::write(self.session_dir(session).join(ENTRIES_FILE), payload).await?;
        Ok(())
    }

    async fn nearest(
        &self,
        session: &SessionId,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CapabilityError> {
        let entries = self.read_entries(session).await?;
        Ok(rank_by_similarity(&entries, query_vector, limit))
    }

    async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        fs::remove_dir_all(self.session_dir(session)).await?;
        Ok(())
    }
}
