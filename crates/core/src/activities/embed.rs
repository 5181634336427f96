use crate::error::{ActivityError, ErrorKind};
use crate::models::TextSegment;
use crate::traits::EmbeddingClient;

pub struct EmbedActivity<E> {
    client: E,
    model: String,
    dimension: usize,
    max_batch: usize,
}

impl<E: EmbeddingClient> EmbedActivity<E> {
    pub fn new(client: E, model: impl Into<String>, dimension: usize, max_batch: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimension,
            max_batch: max_batch.max(1),
        }
    }

    /// Embeds segments in collaborator-sized sub-batches, preserving order.
    /// Failures always propagate; an empty success is never fabricated.
    pub async fn run(&self, segments: &[TextSegment]) -> Result<Vec<Vec<f32>>, ActivityError> {
        if segments.is_empty() {
            return Err(ActivityError::new(
                ErrorKind::EmptyInput,
                "embed invoked with zero segments; the orchestrator should have short-circuited",
            ));
        }

        let mut vectors = Vec::with_capacity(segments.len());
        for batch in segments.chunks(self.max_batch) {
            let texts: Vec<String> = batch.iter().map(|segment| segment.text.clone()).collect();
            let batch_vectors = self.client.embed(&self.model, &texts).await?;

            if batch_vectors.len() != texts.len() {
                return Err(ActivityError::new(
                    ErrorKind::Configuration,
                    format!(
                        "embedding service returned {} vectors for {} texts",
                        batch_vectors.len(),
                        texts.len()
                    ),
                ));
            }

            for vector in &batch_vectors {
                if vector.len() != self.dimension {
                    return Err(ActivityError::new(
                        ErrorKind::Configuration,
                        format!(
                            "embedding dimension {} does not match configured {}",
                            vector.len(),
                            self.dimension
                        ),
                    ));
                }
            }

            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }
}
