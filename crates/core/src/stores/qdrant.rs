use crate::error::IndexError;
use crate::models::{RetrievedChunk, TextChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

/// Vector index backed by a Qdrant server over its REST API. One collection
/// per process; the collection persists across restarts and plays the role
/// of the index directory.
pub struct QdrantIndex {
    endpoint: String,
    collection: String,
    client: Client,
}

impl QdrantIndex {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
            client: Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/collections/{}", self.endpoint, self.collection)
    }

    /// Creates the collection if it does not exist yet. Idempotent.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url()).send().await?;

        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if !response.status().is_client_error() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.collection_url())
            .json(&json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: format!("collection setup failed with {}", response.status()),
            });
        }

        Ok(())
    }
}

/// Qdrant point ids are numeric; fold the leading 64 bits of the chunk id
/// hash into one. Deterministic, so identical chunks dedup on upsert.
fn point_id(chunk_id: &str) -> Result<u64, IndexError> {
    let prefix = chunk_id.get(..16).ok_or_else(|| {
        IndexError::Request(format!("chunk id too short for a point id: {chunk_id}"))
    })?;
    u64::from_str_radix(prefix, 16)
        .map_err(|error| IndexError::Request(format!("chunk id is not hex: {error}")))
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(
        &self,
        chunks: &[TextChunk],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }
        if chunks.is_empty() {
            return Ok(());
        }

        let vector_size = embeddings[0].len();
        self.ensure_collection(vector_size).await?;

        let points = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, embedding)| {
                if embedding.len() != vector_size {
                    return Err(IndexError::DimensionMismatch {
                        expected: vector_size,
                        actual: embedding.len(),
                    });
                }

                Ok(json!({
                    "id": point_id(&chunk.chunk_id)?,
                    "vector": embedding,
                    "payload": {
                        "chunk_id": chunk.chunk_id,
                        "document_id": chunk.document_id,
                        "source": chunk.source,
                        "page": chunk.page,
                        "chunk_index": chunk.chunk_index,
                        "text": chunk.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url()))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let response = self
            .client
            .post(format!("{}/points/search", self.collection_url()))
            .json(&json!({
                "vector": query_vector,
                "limit": top_k,
                "with_payload": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::new();
        for hit in hits {
            let chunk_id = hit
                .pointer("/payload/chunk_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let source = hit
                .pointer("/payload/source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let page = hit
                .pointer("/payload/page")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            let text = hit
                .pointer("/payload/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

            result.push(RetrievedChunk {
                chunk_id,
                source,
                page,
                text,
                score,
            });
        }

        Ok(result)
    }

    async fn clear(&self) -> Result<(), IndexError> {
        let response = self.client.delete(self.collection_url()).send().await?;

        // A missing collection is already clear.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }

        Err(IndexError::BackendResponse {
            backend: "qdrant".to_string(),
            details: response.status().to_string(),
        })
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let response = self
            .client
            .post(format!("{}/points/count", self.collection_url()))
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        Ok(parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }
}
