//! Retrieval service: embed a query, search the index, rank the hits.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::index::{ScoredNode, VectorIndex};
use crate::models::{Chunk, ContextFilter, IngestedDoc, Source};

pub struct ChunksService {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    most_relevant_window: usize,
}

impl ChunksService {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        most_relevant_window: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            most_relevant_window,
        }
    }

    /// Up to `limit` chunks for `text`, best first. Embedding and index
    /// failures propagate unchanged.
    pub async fn retrieve_relevant(
        &self,
        text: &str,
        limit: usize,
        filter: Option<&ContextFilter>,
    ) -> Result<Vec<Chunk>> {
        let query = embed_query(self.embedder.as_ref(), text).await?;
        let mut hits = self.index.query(&query, limit, filter).await;
        sort_by_score(&mut hits);
        tracing::debug!(limit, hits = hits.len(), "retrieved chunks");
        Ok(hits.into_iter().map(into_chunk).collect())
    }

    /// The single best chunk within the configured window, if any.
    pub async fn retrieve_most_relevant(
        &self,
        text: &str,
        filter: Option<&ContextFilter>,
    ) -> Result<Option<Chunk>> {
        let chunks = self
            .retrieve_relevant(text, self.most_relevant_window, filter)
            .await?;
        Ok(chunks.into_iter().next())
    }
}

/// Order hits by score, highest first. Missing scores rank as 0.0 and equal
/// scores keep their incoming order.
pub fn sort_by_score(hits: &mut [ScoredNode]) {
    hits.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .total_cmp(&a.score.unwrap_or(0.0))
    });
}

fn into_chunk(hit: ScoredNode) -> Chunk {
    let document = IngestedDoc::new(hit.node.ref_doc_id, Some(hit.node.metadata));
    Chunk::new(hit.score.unwrap_or(0.0), document, hit.node.text)
}

/// Citations for `chunks`, without duplicates, in first-seen order.
pub fn curate_sources(chunks: &[Chunk]) -> Vec<Source> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .map(Source::from_chunk)
        .filter(|s| seen.insert(s.clone()))
        .collect()
}
