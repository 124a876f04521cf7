use crate::embeddings::Embedder;
use crate::error::CapabilityError;
use crate::models::{AuditOptions, Chunk, IndexedChunk, ScoredChunk};
use crate::session::SessionId;
use crate::traits::VectorIndexService;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalConfig {
    pub k: usize,
    pub fetch_k: usize,
    /// 1.0 ranks purely by relevance, 0.0 purely by diversity.
    pub lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::from(&AuditOptions::default())
    }
}

impl From<&AuditOptions> for RetrievalConfig {
    fn from(value: &AuditOptions) -> Self {
        Self {
            k: value.retrieval_k,
            fetch_k: value.retrieval_fetch_k,
            lambda: value.mmr_lambda,
        }
    }
}

impl RetrievalConfig {
    pub fn effective_fetch_k(&self) -> usize {
        self.fetch_k.max(self.k)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut left_norm = 0f32;
    let mut right_norm = 0f32;
    for (a, b) in left.iter().zip(right.iter()) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

/// Brute-force nearest neighbours for the in-process backends.
pub fn rank_by_similarity(entries: &[IndexedChunk], query: &[f32], limit: usize) -> Vec<ScoredChunk> {
    let mut scored: Vec<ScoredChunk> = entries
        .iter()
        .map(|entry| ScoredChunk {
            chunk: entry.chunk.clone(),
            embedding: entry.embedding.clone(),
            score: cosine_similarity(query, &entry.embedding),
        })
        .collect();

    scored.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.chunk.chunk_index.cmp(&right.chunk.chunk_index))
    });
    scored.truncate(limit);
    scored
}

/// Greedy maximal-marginal-relevance selection of `k` candidates.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: Vec<ScoredChunk>,
    k: usize,
    lambda: f32,
) -> Vec<ScoredChunk> {
    let mut seen = HashSet::new();
    let mut pool: Vec<ScoredChunk> = candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.chunk.chunk_id.clone()))
        .map(|mut candidate| {
            candidate.score = cosine_similarity(query, &candidate.embedding);
            candidate
        })
        .collect();

    let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k.min(pool.len()));
    while selected.len() < k && !pool.is_empty() {
        let mut best_index = 0usize;
        let mut best_score = f32::NEG_INFINITY;

        for (index, candidate) in pool.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|chosen| cosine_similarity(&candidate.embedding, &chosen.embedding))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };

            let marginal = lambda * candidate.score - (1.0 - lambda) * redundancy;
            if marginal > best_score {
                best_score = marginal;
                best_index = index;
            }
        }

        selected.push(pool.remove(best_index));
    }

    selected
}

/// Embeds `query_text`, fetches the `fetch_k` nearest chunks of the session and
/// keeps a diverse subset of at most `k`.
pub async fn retrieve<I, E>(
    index: &I,
    session: &SessionId,
    embedder: &E,
    query_text: &str,
    config: RetrievalConfig,
) -> Result<Vec<Chunk>, CapabilityError>
where
    I: VectorIndexService + ?Sized,
    E: Embedder + ?Sized,
{
    if config.k == 0 {
        return Ok(Vec::new());
    }

    let query_vector = embedder.embed(query_text).await?;
    let candidates = index
        .nearest(session, &query_vector, config.effective_fetch_k())
        .await?;
    let fetched = candidates.len();

    let selected = maximal_marginal_relevance(&query_vector, candidates, config.k, config.lambda);
    debug!(
        session = %session,
        fetched,
        selected = selected.len(),
        scores = ?selected.iter().map(|hit| hit.score).collect::<Vec<_>>(),
        "mmr retrieval"
    );

    Ok(selected.into_iter().map(|hit| hit.chunk).collect())
}
