use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
        }
    }
}

/// A PDF as received from an upload form or read off disk. Discarded after
/// parsing; only the chunks derived from it survive.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub filename: String,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source: String,
    pub page: u32,
    pub chunk_index: u64,
    pub text: String,
}

/// A chunk returned by the vector index for a query, with its
/// similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub source: String,
    pub page: u32,
    pub text: String,
    pub score: f32,
}

/// Source attribution attached to a retrieval-grounded answer. The preview
/// is capped at 200 characters for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub page: u32,
    pub score: f32,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub files_indexed: usize,
    pub chunks_processed: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Whether anything has been indexed yet. Chat queries in `NoIndex` always
/// take the direct-generation path; `Indexed` enables retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    NoIndex,
    Indexed,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkingOptions {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_chars: 1_000,
            overlap_chars: 150,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub top_k: usize,
    /// Hits scoring below this are dropped before generation. 0.0 disables
    /// the filter and the retriever behaves as a plain top-k fetch.
    pub min_score: f32,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.0,
        }
    }
}
