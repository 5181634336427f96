use crate::error::{ActivityError, ErrorKind};
use crate::models::{DocumentJob, InsertionReceipt, TextSegment, VectorRecord};
use crate::traits::VectorStore;
use sha2::{Digest, Sha256};

pub struct StoreActivity<V> {
    store: V,
    collection: String,
}

impl<V: VectorStore> StoreActivity<V> {
    pub fn new(store: V, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Check-then-create; the create call tolerating "already exists" keeps
    /// the race between two initializers benign.
    pub async fn ensure_ready(&self, dimension: usize) -> Result<(), ActivityError> {
        self.store
            .ensure_collection(&self.collection, dimension)
            .await
    }

    /// Inserts one record per segment with deterministic ids, then flushes so
    /// subsequent queries observe the data. Safe to re-run after a crash:
    /// identical ids upsert rather than duplicate.
    pub async fn run(
        &self,
        job: &DocumentJob,
        segments: &[TextSegment],
        vectors: &[Vec<f32>],
    ) -> Result<InsertionReceipt, ActivityError> {
        if vectors.is_empty() {
            return Err(ActivityError::new(
                ErrorKind::EmptyInput,
                "store invoked with zero vectors; the orchestrator should have short-circuited",
            ));
        }
        if vectors.len() != segments.len() {
            return Err(ActivityError::new(
                ErrorKind::Configuration,
                format!(
                    "vector count {} does not match segment count {}",
                    vectors.len(),
                    segments.len()
                ),
            ));
        }

        let records: Vec<VectorRecord> = segments
            .iter()
            .zip(vectors.iter())
            .map(|(segment, vector)| VectorRecord {
                record_id: record_id(&job.run_id, segment.index),
                vector: vector.clone(),
                document_id: job.document_id.clone(),
                run_id: job.run_id.clone(),
                segment_index: segment.index,
            })
            .collect();

        let receipt = self.store.insert(&self.collection, &records).await?;
        self.store.flush(&self.collection).await?;
        Ok(receipt)
    }
}

/// Deterministic per (run_id, segment index) so redelivered inserts collide
/// on the same key.
pub fn record_id(run_id: &str, segment_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(segment_index.to_be_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}
