use chrono::Utc;
use clap::Parser;
use pdf_chat_core::{
    discover_pdf_files, load_documents, truncate_to_cap, ChatEngine, ChunkingOptions, IndexState,
    OllamaEmbedder, OllamaGenerator, QdrantIndex, RetrievalOptions,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_UPLOAD_FILES,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    /// PDF files to ground the chat in (repeatable, max 10 per run).
    #[arg(long = "pdf")]
    pdfs: Vec<PathBuf>,

    /// Folder to scan recursively for PDFs.
    #[arg(long)]
    pdf_dir: Option<PathBuf>,

    /// Reuse whatever the index already holds instead of uploading.
    #[arg(long, default_value_t = false)]
    reuse_index: bool,

    /// Drop all indexed chunks and exit.
    #[arg(long, default_value_t = false)]
    clear_index: bool,

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
    #[arg(long, default_value = "pdf_chat_chunks")]
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

    let engine = ChatEngine::new(
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
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "pdf-chat boot"
    );

    if cli.clear_index {
        engine
            .clear_index()
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
        println!("index cleared");
        return Ok(());
    }

    let mut paths = cli.pdfs.clone();
    if let Some(folder) = &cli.pdf_dir {
        paths.extend(discover_pdf_files(folder));
    }

    if !paths.is_empty() {
        let documents =
            load_documents(&paths).map_err(|error| anyhow::anyhow!(error.to_string()))?;
        let (documents, dropped) = truncate_to_cap(documents);
        if dropped > 0 {
            warn!(
                dropped,
                "you can chat with at most {MAX_UPLOAD_FILES} PDFs at once; extra files ignored"
            );
            println!("warning: only the first {MAX_UPLOAD_FILES} PDFs were kept ({dropped} ignored)");
        }

        let report = engine
            .ingest(documents)
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

        for skipped in &report.skipped {
            warn!(file = %skipped.filename, reason = %skipped.reason, "skipped pdf");
            println!("warning: skipped {}: {}", skipped.filename, skipped.reason);
        }
        println!(
            "indexed {} PDFs, {} chunks processed",
            report.files_indexed, report.chunks_processed
        );
    } else if cli.reuse_index {
        let state = engine
            .restore_state()
            .await
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
        info!(?state, "restored index state");
    }

    match engine.state().await {
        IndexState::Indexed => println!("PDF chat ready; answers cite your documents."),
        IndexState::NoIndex => println!("Direct chat ready; no documents indexed."),
    }
    println!("Type a question, or 'exit' to quit.\n");

    let session = Uuid::new_v4().to_string();
    let stdin = io::stdin();

    loop {
        print!("You: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        match engine.chat(&session, question).await {
            Ok(answer) => {
                println!("Bot: {}\n", answer.answer);
                if !answer.sources.is_empty() {
                    println!("Retrieved context:");
                    for source in &answer.sources {
                        println!(
                            "  {} (p.{}, score {:.3}): {}...",
                            source.source, source.page, source.score, source.preview
                        );
                    }
                    println!();
                }
            }
            Err(error) => {
                warn!(%error, "chat turn failed");
                println!("error: {error}\n");
            }
        }
    }

    Ok(())
}
