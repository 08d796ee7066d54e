use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use clap::Parser;
use pdf_chat_core::{
    ChatEngine, ChatError, ChunkingOptions, GenerationError, IngestError, OllamaEmbedder,
    OllamaGenerator, QdrantIndex, RetrievalOptions, SkippedFile, UploadedDocument,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Engine = ChatEngine<OllamaEmbedder, QdrantIndex, OllamaGenerator>;

/// Chats that do not name a session share this one. Callers wanting
/// isolation pass a `session` field.
const DEFAULT_SESSION: &str = "default";

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "pdf-chat-server", version)]
struct Cli {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Generation model name
    #[arg(long, default_value = "llama2")]
    model: String,

    /// Embedding model name
    #[arg(long, default_value = "llama2")]
    embedding_model: String,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection holding the chunk index
    #[arg(long, default_value = "pdf_chat_service")]
    collection: String,

    /// Chunk size in characters
    #[arg(long, default_value = "1000")]
    chunk_chars: usize,

    /// Overlap between adjacent chunks in characters
    #[arg(long, default_value = "150")]
    overlap_chars: usize,

    /// Number of chunks retrieved per question
    #[arg(long, default_value = "3")]
    top_k: usize,

    /// Similarity threshold below which retrieved chunks are dropped
    #[arg(long, default_value = "0.0")]
    min_score: f32,

    /// Seconds before a model call is abandoned
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: String,
    files_indexed: usize,
    chunks_processed: usize,
    skipped: Vec<SkippedFile>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
    session: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
    sources: Vec<String>,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(error: ChatError) -> Self {
        let status = match &error {
            ChatError::EmptyQuestion => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::Ingest(IngestError::InvalidArgument(_))
            | ChatError::Ingest(IngestError::InvalidChunkConfig(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ChatError::Ingest(_) => StatusCode::BAD_REQUEST,
            ChatError::Generation(GenerationError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ChatError::Generation(_) | ChatError::Index(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, error.to_string())
    }
}

async fn upload_handler(
    State(engine): State<Arc<Engine>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::new(StatusCode::BAD_REQUEST, error.to_string()))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let filename = field
            .file_name()
            .unwrap_or("upload.pdf")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::new(StatusCode::BAD_REQUEST, error.to_string()))?;
        uploads.push(UploadedDocument {
            filename,
            bytes: bytes.to_vec(),
        });
    }

    let upload_count = uploads.len();
    let report = engine.ingest(uploads).await?;

    for skipped in &report.skipped {
        warn!(file = %skipped.filename, reason = %skipped.reason, "skipped pdf");
    }
    info!(
        files = upload_count,
        chunks = report.chunks_processed,
        "upload indexed"
    );

    Ok(Json(UploadResponse {
        message: format!(
            "Uploaded {} PDFs, {} chunks processed.",
            upload_count, report.chunks_processed
        ),
        files_indexed: report.files_indexed,
        chunks_processed: report.chunks_processed,
        skipped: report.skipped,
    }))
}

async fn chat_handler(
    State(engine): State<Arc<Engine>>,
    Form(request): Form<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let session = request.session.as_deref().unwrap_or(DEFAULT_SESSION);
    let answer = engine.chat(session, &request.question).await?;

    Ok(Json(ChatResponse {
        sources: answer
            .sources
            .iter()
            .map(|source| source.source.clone())
            .collect(),
        answer: answer.answer,
    }))
}

async fn clear_handler(State(engine): State<Arc<Engine>>) -> Result<Json<serde_json::Value>, ApiError> {
    engine.clear_index().await.map_err(ChatError::Index)?;
    Ok(Json(serde_json::json!({ "message": "index cleared" })))
}

async fn health_handler(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "index_state": engine.state().await,
    }))
}

fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/chat", post(chat_handler))
        .route("/index/clear", post(clear_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let embedder = OllamaEmbedder::new(&cli.ollama_url, &cli.embedding_model)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    let index = QdrantIndex::new(&cli.qdrant_url, &cli.collection);
    let generator = OllamaGenerator::new(&cli.ollama_url, &cli.model, cli.timeout_secs)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let engine = Arc::new(ChatEngine::new(
        embedder,
        index,
        generator,
        ChunkingOptions {
            chunk_chars: cli.chunk_chars,
            overlap_chars: cli.overlap_chars,
        },
        RetrievalOptions {
            top_k: cli.top_k,
            min_score: cli.min_score,
        },
    ));

    // The collection outlives the process; pick up where it left off.
    match engine.restore_state().await {
        Ok(state) => info!(?state, "restored index state"),
        Err(error) => warn!(%error, "index unreachable at boot; starting without it"),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %cli.bind,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat-server boot"
    );

    let listener = tokio::net::TcpListener::bind(&cli.bind).await?;
    axum::serve(listener, router(engine)).await?;

    Ok(())
}
