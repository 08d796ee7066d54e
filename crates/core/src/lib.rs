pub mod chunking;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod generate;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, normalize_whitespace, split_with_overlap};
pub use embeddings::{Embedder, OllamaEmbedder};
pub use engine::{ChatEngine, SOURCE_PREVIEW_CHARS};
pub use error::{ChatError, GenerationError, IndexError, IngestError};
pub use extractor::{extract_page_texts, extract_pages_from_bytes, PageText, PdfExtractor};
pub use generate::{OllamaGenerator, TextGenerator, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use ingest::{
    chunk_uploads, discover_pdf_files, load_documents, truncate_to_cap, ChunkedBatch,
    MAX_UPLOAD_FILES,
};
pub use memory::{ConversationMemory, SessionRegistry};
pub use models::{
    ChatAnswer, ChatRole, ChatTurn, ChunkingOptions, DocumentFingerprint, IndexState,
    IngestionReport, RetrievalOptions, RetrievedChunk, SkippedFile, SourceRef, TextChunk,
    UploadedDocument,
};
pub use stores::QdrantIndex;
pub use traits::VectorIndex;
