use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding dimension {actual} does not match {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),

    #[error("http error: {0}")]
    Http(reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("model returned an empty answer")]
    EmptyAnswer,
}

/// Umbrella error for the chat engine; the CLI maps these to user-visible
/// messages and the server maps them to HTTP statuses.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("question is empty")]
    EmptyQuestion,
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;
