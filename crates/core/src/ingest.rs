use crate::chunking::{build_chunks, validate_chunking};
use crate::error::IngestError;
use crate::extractor::extract_pages_from_bytes;
use crate::models::{
    ChunkingOptions, DocumentFingerprint, SkippedFile, TextChunk, UploadedDocument,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Most PDFs one interactive request may index. Anything past the cap is
/// truncated and surfaced as a warning by the caller.
pub const MAX_UPLOAD_FILES: usize = 10;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<UploadedDocument>, IngestError> {
    let mut documents = Vec::with_capacity(paths.len());

    for path in paths {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
            })?;
        documents.push(UploadedDocument {
            filename: filename.to_string(),
            bytes: fs::read(path)?,
        });
    }

    Ok(documents)
}

/// Enforces [`MAX_UPLOAD_FILES`], returning the kept documents and how many
/// were dropped.
pub fn truncate_to_cap(documents: Vec<UploadedDocument>) -> (Vec<UploadedDocument>, usize) {
    if documents.len() <= MAX_UPLOAD_FILES {
        return (documents, 0);
    }
    let dropped = documents.len() - MAX_UPLOAD_FILES;
    let mut kept = documents;
    kept.truncate(MAX_UPLOAD_FILES);
    (kept, dropped)
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct ChunkedBatch {
    pub chunks: Vec<TextChunk>,
    pub files_chunked: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Parses and chunks each upload independently. A malformed PDF lands in
/// `skipped` with its reason and the remaining files are still processed.
pub fn chunk_uploads(
    uploads: &[UploadedDocument],
    options: ChunkingOptions,
) -> Result<ChunkedBatch, IngestError> {
    validate_chunking(&options)?;
    if uploads.is_empty() {
        return Err(IngestError::InvalidArgument(
            "no documents to ingest".to_string(),
        ));
    }

    let mut chunks = Vec::new();
    let mut skipped = Vec::new();
    let mut files_chunked = 0;
    let mut cursor = 0u64;

    for upload in uploads {
        let build_result = (|| {
            let fingerprint = fingerprint_upload(upload);
            let pages = extract_pages_from_bytes(&upload.bytes)?;
            let mut file_chunks = Vec::new();

            for page in pages {
                let (page_chunks, next_cursor) =
                    build_chunks(&fingerprint, page.number, &page.text, options, cursor)?;
                cursor = next_cursor;
                file_chunks.extend(page_chunks);
            }

            Ok::<_, IngestError>(file_chunks)
        })();

        match build_result {
            Ok(file_chunks) => {
                files_chunked += 1;
                chunks.extend(file_chunks);
            }
            Err(error) => skipped.push(SkippedFile {
                filename: upload.filename.clone(),
                reason: error.to_string(),
            }),
        }
    }

    Ok(ChunkedBatch {
        chunks,
        files_chunked,
        skipped,
    })
}

fn fingerprint_upload(upload: &UploadedDocument) -> DocumentFingerprint {
    DocumentFingerprint {
        document_id: digest_bytes(upload.filename.as_bytes()),
        filename: upload.filename.clone(),
        checksum: digest_bytes(&upload.bytes),
        ingested_at: Utc::now(),
    }
}
