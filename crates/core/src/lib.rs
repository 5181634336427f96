pub mod activities;
pub mod clients;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod state;
pub mod traits;
pub mod worker;

pub use activities::{record_id, EmbedActivity, FetchActivity, ParseActivity, StoreActivity};
pub use clients::{CohereClient, LopdfParser, MilvusStore};
pub use error::{ActivityError, ErrorKind, PipelineError};
pub use models::{
    DocumentJob, InsertionReceipt, PipelineOptions, PipelineState, PipelineStep, StagedFile,
    StepAttempts, StepFailure, TextSegment, VectorRecord,
};
pub use orchestrator::{submit_job, JobHandle, PipelineOrchestrator};
pub use queue::{LeasedTask, SpoolQueue, TaskQueue};
pub use retry::{RetryDecision, RetryPolicies, RetryPolicy};
pub use state::{FileStateStore, StateStore};
pub use traits::{DocumentParser, EmbeddingClient, VectorStore};
pub use worker::{Worker, WorkerPool};
