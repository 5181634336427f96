use crate::error::ActivityError;
use crate::models::{StagedFile, TextSegment};
use crate::traits::DocumentParser;

pub struct ParseActivity<P> {
    parser: P,
}

impl<P: DocumentParser> ParseActivity<P> {
    pub fn new(parser: P) -> Self {
        Self { parser }
    }

    /// Extracts ordered, trimmed, non-empty segments. Zero segments is a
    /// valid result; the orchestrator short-circuits the rest of the pipeline.
    pub async fn run(&self, staged: &StagedFile) -> Result<Vec<TextSegment>, ActivityError> {
        let raw = self.parser.parse(&staged.local_path).await?;

        Ok(raw
            .into_iter()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .enumerate()
            .map(|(index, text)| TextSegment { index, text })
            .collect())
    }
}
