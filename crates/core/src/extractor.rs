use crate::error::IngestError;
use lopdf::Document;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}

/// Parses uploaded PDF bytes by spilling them to a named temporary file
/// first. The file is removed when the handle drops.
pub fn extract_pages_from_bytes(bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    extract_page_texts(tmp.path())
}

#[cfg(test)]
mod tests {
    use super::extract_pages_from_bytes;
    use crate::error::IngestError;

    #[test]
    fn garbage_bytes_are_a_parse_error() {
        let result = extract_pages_from_bytes(b"%PDF-1.4\n%not really a pdf");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn empty_bytes_are_a_parse_error() {
        let result = extract_pages_from_bytes(b"");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }
}
