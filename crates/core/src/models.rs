use crate::error::{ActivityError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentJob {
    pub document_id: String,
    pub source_url: String,
    /// System-minted correlation key. Callers may reuse a document_id; runs
    /// are always independent.
    pub run_id: String,
}

impl DocumentJob {
    pub fn new(document_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            source_url: source_url.into(),
            run_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedFile {
    pub local_path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextSegment {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InsertionReceipt {
    pub inserted_count: usize,
    pub record_ids: Vec<String>,
}

/// One row handed to the vector store. The record id is deterministic per
/// (run_id, segment index) so a redelivered Store upserts instead of
/// duplicating.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VectorRecord {
    pub record_id: String,
    pub vector: Vec<f32>,
    pub document_id: String,
    pub run_id: String,
    pub segment_index: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PipelineStep {
    Fetching,
    Parsing,
    Embedding,
    Storing,
    Completed,
    Failed,
}

impl PipelineStep {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStep::Completed | PipelineStep::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Fetching => "fetching",
            PipelineStep::Parsing => "parsing",
            PipelineStep::Embedding => "embedding",
            PipelineStep::Storing => "storing",
            PipelineStep::Completed => "completed",
            PipelineStep::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StepAttempts {
    pub fetch: u32,
    pub parse: u32,
    pub embed: u32,
    pub store: u32,
}

/// Terminal failure record. `kind` is None only when the job was cancelled
/// rather than errored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub step: PipelineStep,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

/// The only crash-durable entity. Everything needed to resume at the correct
/// step lives here: the step itself, the previous step's output, and the
/// per-step attempt counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    pub job: DocumentJob,
    pub step: PipelineStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<StagedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<TextSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<Vec<Vec<f32>>>,
    pub attempts: StepAttempts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<InsertionReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ActivityError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    #[serde(default)]
    pub cancel_requested: bool,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(job: DocumentJob) -> Self {
        Self {
            job,
            step: PipelineStep::Fetching,
            staged: None,
            segments: None,
            vectors: None,
            attempts: StepAttempts::default(),
            receipt: None,
            last_error: None,
            failure: None,
            cancel_requested: false,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub staging_dir: PathBuf,
    pub collection: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub max_embed_batch: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir(),
            collection: "doc_chunks".to_string(),
            embedding_model: "embed-english-v2.0".to_string(),
            embedding_dimension: 4096,
            max_embed_batch: 96,
        }
    }
}
