use crate::error::ActivityError;
use crate::models::{InsertionReceipt, VectorRecord};
use async_trait::async_trait;
use std::path::Path;

/// Document parser collaborator: local file in, ordered raw text out.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<Vec<String>, ActivityError>;
}

/// Embedding service collaborator. Implementations must return one vector per
/// input text, in input order.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ActivityError>;
}

/// Vector store collaborator. `ensure_collection` must tolerate a concurrent
/// initializer winning the create race; `insert` must treat record ids as
/// upsert keys.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn ensure_collection(&self, name: &str, dimension: usize) -> Result<(), ActivityError>;

    async fn insert(
        &self,
        name: &str,
        records: &[VectorRecord],
    ) -> Result<InsertionReceipt, ActivityError>;

    async fn flush(&self, name: &str) -> Result<(), ActivityError>;
}
