use crate::error::CapabilityError;
use crate::models::{Chunk, ScoredChunk};
use crate::session::SessionId;
use crate::traits::{check_embedding_shape, VectorIndexService};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

const BACKEND: &str = "qdrant";

/// One Qdrant collection per session. Collections are created on the first
/// insert, once the embedding dimension is known, and dropped on release.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
    collections: Mutex<HashMap<SessionId, usize>>,
}

impl QdrantStore {
    /// `timeout_secs` bounds every request, collection cleanup included.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self, CapabilityError> {
        let parsed = Url::parse(endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            endpoint: parsed.as_str().trim_end_matches('/').to_string(),
            client,
            collections: Mutex::new(HashMap::new()),
        })
    }

    fn collection_dimensions(&self, session: &SessionId) -> Result<Option<usize>, CapabilityError> {
        let collections = self.collections.lock().map_err(|_| poisoned())?;
        Ok(collections.get(session).copied())
    }

    async fn create_collection(&self, session: &SessionId, dimensions: usize) -> Result<(), CapabilityError> {
        let response = self
            .client
            .put(format!("{}/collections/{}", self.endpoint, session))
            .json(&json!({
                "vectors": {
                    "size": dimensions,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("create collection returned {}", response.status()),
            });
        }

        self.collections
            .lock()
            .map_err(|_| poisoned())?
            .insert(session.clone(), dimensions);
        Ok(())
    }
}

fn poisoned() -> CapabilityError {
    CapabilityError::Request("qdrant collection registry lock poisoned".to_string())
}

#[async_trait]
impl VectorIndexService for QdrantStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn open_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        let mut collections = self.collections.lock().map_err(|_| poisoned())?;
        if collections.contains_key(session) {
            return Err(CapabilityError::Request(format!(
                "index session {session} already exists"
            )));
        }
        // Zero marks an open session whose collection does not exist yet.
        collections.insert(session.clone(), 0);
        Ok(())
    }

    async fn index_chunks(
        &self,
        session: &SessionId,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), CapabilityError> {
        let dimensions = match check_embedding_shape(chunks, embeddings)? {
            Some(dimensions) => dimensions,
            None => return Ok(()),
        };

        match self.collection_dimensions(session)? {
            None => {
                return Err(CapabilityError::Request(format!(
                    "unknown index session {session}"
                )))
            }
            Some(0) => self.create_collection(session, dimensions).await?,
            Some(existing) if existing != dimensions => {
                return Err(CapabilityError::Request(format!(
                    "embedding dimension {dimensions} != {existing}"
                )))
            }
            Some(_) => {}
        }

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                let payload = serde_json::to_value(chunk)?;
                Ok(json!({
                    "id": chunk.chunk_index,
                    "vector": embedding,
                    "payload": payload,
                }))
            })
            .collect::<Result<Vec<_>, CapabilityError>>()?;

        let response = self
            .client
            .put(format!(
                "{}/collections/{}/points?wait=true",
                self.endpoint, session
            ))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn nearest(
        &self,
        session: &SessionId,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, CapabilityError> {
        match self.collection_dimensions(session)? {
            None => {
                return Err(CapabilityError::Request(format!(
                    "unknown index session {session}"
                )))
            }
            Some(0) => return Ok(Vec::new()),
            Some(dimensions) if dimensions != query_vector.len() => {
                return Err(CapabilityError::Request(format!(
                    "query vector dim {} is not {}",
                    query_vector.len(),
                    dimensions
                )))
            }
            Some(_) => {}
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, session
            ))
            .json(&json!({
                "vector": query_vector,
                "limit": limit,
                "with_payload": true,
                "with_vector": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        parse_search_hits(&parsed)
    }

    async fn release_session(&self, session: &SessionId) -> Result<(), CapabilityError> {
        let dimensions = self
            .collections
            .lock()
            .map_err(|_| poisoned())?
            .remove(session);

        match dimensions {
            None => Err(CapabilityError::Request(format!(
                "unknown index session {session}"
            ))),
            Some(0) => Ok(()),
            Some(_) => {
                let response = self
                    .client
                    .delete(format!("{}/collections/{}", self.endpoint, session))
                    .send()
                    .await?;

                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
                    Ok(())
                } else {
                    Err(CapabilityError::BackendResponse {
                        backend: BACKEND.to_string(),
                        details: format!("delete collection returned {}", response.status()),
                    })
                }
            }
        }
    }
}

fn parse_search_hits(parsed: &Value) -> Result<Vec<ScoredChunk>, CapabilityError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let payload = hit.pointer("/payload").cloned().ok_or_else(|| {
            CapabilityError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "search hit without payload".to_string(),
            }
        })?;
        let chunk: Chunk = serde_json::from_value(payload)?;
        let embedding = hit
            .pointer("/vector")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_f64)
                    .map(|value| value as f32)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

        result.push(ScoredChunk {
            chunk,
            embedding,
            score,
        });
    }

    Ok(result)
}
