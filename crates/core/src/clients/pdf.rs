use crate::error::{ActivityError, ErrorKind};
use crate::traits::DocumentParser;
use async_trait::async_trait;
use lopdf::Document;
use std::path::{Path, PathBuf};

/// lopdf-based parser. Extraction is CPU-bound, so it runs on the blocking
/// pool.
#[derive(Default)]
pub struct LopdfParser;

#[async_trait]
impl DocumentParser for LopdfParser {
    async fn parse(&self, path: &Path) -> Result<Vec<String>, ActivityError> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || parse_blocking(&path))
            .await
            .map_err(|error| {
                ActivityError::new(
                    ErrorKind::CorruptDocument,
                    format!("parser task aborted: {error}"),
                )
            })?
    }
}

fn parse_blocking(path: &Path) -> Result<Vec<String>, ActivityError> {
    // Read errors are transient from the parser's point of view; the staged
    // file may still be landing on shared storage.
    let bytes = std::fs::read(path).map_err(|error| {
        ActivityError::new(
            ErrorKind::LocalStorage,
            format!("cannot read staged file {}: {error}", path.display()),
        )
    })?;

    if !bytes.starts_with(b"%PDF-") {
        return Err(ActivityError::new(
            ErrorKind::UnsupportedFormat,
            format!("{} is not a pdf document", path.display()),
        ));
    }

    let document = Document::load_mem(&bytes).map_err(|error| {
        ActivityError::new(
            ErrorKind::CorruptDocument,
            format!("pdf could not be loaded: {error}"),
        )
    })?;

    let mut segments = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document.extract_text(&[page_no]).map_err(|error| {
            ActivityError::new(
                ErrorKind::CorruptDocument,
                format!("pdf page {page_no} could not be read: {error}"),
            )
        })?;

        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() {
                segments.push(line.to_string());
            }
        }
    }

    // A readable pdf with no text is a valid empty result, not an error.
    Ok(segments)
}
