use crate::error::IngestError;
use crate::models::{ChunkingOptions, DocumentFingerprint, TextChunk};
use sha2::{Digest, Sha256};

pub fn validate_chunking(options: &ChunkingOptions) -> Result<(), IngestError> {
    if options.chunk_chars == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk size must be positive".to_string(),
        ));
    }
    if options.overlap_chars >= options.chunk_chars {
        return Err(IngestError::InvalidChunkConfig(format!(
            "overlap {} must be smaller than chunk size {}",
            options.overlap_chars, options.chunk_chars
        )));
    }
    Ok(())
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits text into fixed-size character windows with a fixed overlap.
/// Purely character-count based: boundaries do not respect sentence or
/// paragraph structure. Adjacent windows share exactly `overlap_chars`
/// characters (the final, possibly short, window excepted).
pub fn split_with_overlap(text: &str, options: ChunkingOptions) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + options.chunk_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += options.chunk_chars - options.overlap_chars;
    }

    pieces
}

pub fn build_chunks(
    document: &DocumentFingerprint,
    page: u32,
    page_text: &str,
    options: ChunkingOptions,
    global_index: u64,
) -> Result<(Vec<TextChunk>, u64), IngestError> {
    validate_chunking(&options)?;

    let normalized = normalize_whitespace(page_text);
    let mut chunks = Vec::new();
    let mut cursor = global_index;

    for piece in split_with_overlap(&normalized, options) {
        let chunk_id = make_chunk_id(&document.document_id, page, cursor, &piece);
        chunks.push(TextChunk {
            chunk_id,
            document_id: document.document_id.clone(),
            source: document.filename.clone(),
            page,
            chunk_index: cursor,
            text: piece,
        });
        cursor = cursor.saturating_add(1);
    }

    Ok((chunks, cursor))
}

fn make_chunk_id(document_id: &str, page: u32, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fingerprint() -> DocumentFingerprint {
        DocumentFingerprint {
            document_id: "doc-1".to_string(),
            filename: "test.pdf".to_string(),
            checksum: "checksum".to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn adjacent_windows_share_the_overlap() {
        let options = ChunkingOptions {
            chunk_chars: 10,
            overlap_chars: 3,
        };
        let text: String = ('a'..='z').collect();
        let pieces = split_with_overlap(&text, options);

        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let tail: String = pair[0].chars().rev().take(3).collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let head: String = pair[1].chars().take(3).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn chunk_count_is_deterministic() {
        let options = ChunkingOptions {
            chunk_chars: 12,
            overlap_chars: 4,
        };
        let text = "one two three four five six seven eight nine ten";
        let first = split_with_overlap(text, options);
        let second = split_with_overlap(text, options);
        assert_eq!(first, second);
    }

    #[test]
    fn short_text_yields_a_single_chunk() {
        let pieces = split_with_overlap("short", ChunkingOptions::default());
        assert_eq!(pieces, vec!["short".to_string()]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_with_overlap("", ChunkingOptions::default()).is_empty());
    }

    #[test]
    fn chunk_ids_are_reproducible() {
        let options = ChunkingOptions {
            chunk_chars: 16,
            overlap_chars: 2,
        };
        let text = "The quick brown fox jumps over the lazy dog, twice.";
        let first = build_chunks(&fingerprint(), 1, text, options, 0).unwrap().0;
        let second = build_chunks(&fingerprint(), 1, text, options, 0).unwrap().0;

        assert!(!first.is_empty());
        let first_ids: Vec<_> = first.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn oversized_overlap_is_rejected() {
        let options = ChunkingOptions {
            chunk_chars: 10,
            overlap_chars: 10,
        };
        assert!(matches!(
            build_chunks(&fingerprint(), 1, "text", options, 0),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
