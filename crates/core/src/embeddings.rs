use crate::error::IndexError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

#[async_trait]
pub trait Embedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IndexError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Embedding client for an Ollama server's `/api/embeddings` endpoint.
pub struct OllamaEmbedder {
    endpoint: Url,
    model: String,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, IndexError> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?.join("api/embeddings")?,
            model: model.into(),
            client: Client::new(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let payload: EmbeddingResponse = response.json().await?;
        if payload.embedding.is_empty() {
            return Err(IndexError::BackendResponse {
                backend: "ollama".to_string(),
                details: "embedding response was empty".to_string(),
            });
        }

        Ok(payload.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::OllamaEmbedder;

    #[test]
    fn endpoint_is_joined_against_the_base_url() {
        let embedder = OllamaEmbedder::new("http://localhost:11434", "llama2").unwrap();
        assert_eq!(
            embedder.endpoint.as_str(),
            "http://localhost:11434/api/embeddings"
        );
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(OllamaEmbedder::new("not a url", "llama2").is_err());
    }
}
