use crate::error::IndexError;
use crate::models::{RetrievedChunk, TextChunk};
use async_trait::async_trait;

/// Persistent nearest-neighbor index over chunk embeddings. Point identity
/// is derived from the chunk id, so re-upserting identical content is a
/// no-op and uploads merge instead of replacing prior documents.
#[async_trait]
pub trait VectorIndex {
    async fn upsert(&self, chunks: &[TextChunk], embeddings: &[Vec<f32>])
        -> Result<(), IndexError>;

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;

    /// Drops every indexed chunk.
    async fn clear(&self) -> Result<(), IndexError>;

    async fn count(&self) -> Result<u64, IndexError>;
}
