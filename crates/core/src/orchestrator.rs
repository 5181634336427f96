use crate::activities::{EmbedActivity, FetchActivity, ParseActivity, StoreActivity};
use crate::error::{ActivityError, PipelineError};
use crate::models::{
    DocumentJob, InsertionReceipt, PipelineOptions, PipelineState, PipelineStep, StepAttempts,
    StepFailure, TextSegment,
};
use crate::queue::TaskQueue;
use crate::retry::{RetryDecision, RetryPolicies, RetryPolicy};
use crate::state::StateStore;
use crate::traits::{DocumentParser, EmbeddingClient, VectorStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Deterministic state machine over Fetch -> Parse -> Embed -> Store.
/// Progress is persisted before each transition, so a crashed run resumes at
/// the step it was on instead of starting over. Collaborators are injected at
/// construction; there is no ambient client state.
pub struct PipelineOrchestrator<P, E, V> {
    fetch: FetchActivity,
    parse: ParseActivity<P>,
    embed: EmbedActivity<E>,
    store: StoreActivity<V>,
    states: Arc<dyn StateStore>,
    policies: RetryPolicies,
    embedding_dimension: usize,
}

impl<P, E, V> PipelineOrchestrator<P, E, V>
where
    P: DocumentParser,
    E: EmbeddingClient,
    V: VectorStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        options: PipelineOptions,
        http: reqwest::Client,
        parser: P,
        embedder: E,
        vectors: V,
        states: Arc<dyn StateStore>,
        policies: RetryPolicies,
    ) -> Self {
        Self {
            fetch: FetchActivity::new(http, options.staging_dir),
            parse: ParseActivity::new(parser),
            embed: EmbedActivity::new(
                embedder,
                options.embedding_model,
                options.embedding_dimension,
                options.max_embed_batch,
            ),
            store: StoreActivity::new(vectors, options.collection),
            states,
            policies,
            embedding_dimension: options.embedding_dimension,
        }
    }

    /// Collection bootstrap, run once per worker start.
    pub async fn bootstrap(&self) -> Result<(), ActivityError> {
        self.store.ensure_ready(self.embedding_dimension).await
    }

    /// Drives one job to a terminal state, resuming from persisted progress.
    /// Redelivery of an already-terminal run is a no-op.
    pub async fn run(&self, job: &DocumentJob) -> Result<PipelineState, PipelineError> {
        let mut state = match self.states.load(&job.run_id).await? {
            Some(existing) => existing,
            None => PipelineState::new(job.clone()),
        };

        if state.step.is_terminal() {
            return Ok(state);
        }
        self.checkpoint(&mut state).await?;
        let job = state.job.clone();

        while !state.step.is_terminal() {
            // Pick up cancel requests made through the state store while we
            // were between steps.
            if let Some(stored) = self.states.load(&job.run_id).await? {
                state.cancel_requested = state.cancel_requested || stored.cancel_requested;
            }
            if state.cancel_requested {
                self.cancel(&mut state).await?;
                break;
            }

            match state.step {
                PipelineStep::Fetching => {
                    let outcome = self
                        .attempt_step(&mut state, &self.policies.fetch, |a| &mut a.fetch, || {
                            self.fetch.run(&job.source_url, &job.document_id)
                        })
                        .await?;
                    match outcome {
                        Ok(staged) => {
                            info!(
                                run_id = %job.run_id,
                                path = %staged.local_path.display(),
                                size_bytes = staged.size_bytes,
                                "document staged"
                            );
                            state.staged = Some(staged);
                            self.advance(&mut state, PipelineStep::Parsing).await?;
                        }
                        Err(error) => self.fail(&mut state, PipelineStep::Fetching, error).await?,
                    }
                }
                PipelineStep::Parsing => {
                    let staged = state.staged.clone().ok_or_else(|| PipelineError::CorruptState {
                        run_id: job.run_id.clone(),
                        details: "parsing step without a staged file".to_string(),
                    })?;
                    let outcome = self
                        .attempt_step(&mut state, &self.policies.parse, |a| &mut a.parse, || {
                            self.parse.run(&staged)
                        })
                        .await?;
                    match outcome {
                        Ok(segments) => {
                            // The staged file is consumed; release it now.
                            self.release_staging(&state).await;
                            state.segments = Some(segments.clone());
                            if segments.is_empty() {
                                info!(run_id = %job.run_id, "document yielded no segments, completing early");
                                state.receipt = Some(InsertionReceipt::default());
                                self.advance(&mut state, PipelineStep::Completed).await?;
                            } else {
                                info!(run_id = %job.run_id, segment_count = segments.len(), "document parsed");
                                self.advance(&mut state, PipelineStep::Embedding).await?;
                            }
                        }
                        Err(error) => self.fail(&mut state, PipelineStep::Parsing, error).await?,
                    }
                }
                PipelineStep::Embedding => {
                    let segments = required_segments(&state)?;
                    let outcome = self
                        .attempt_step(&mut state, &self.policies.embed, |a| &mut a.embed, || {
                            self.embed.run(&segments)
                        })
                        .await?;
                    match outcome {
                        Ok(vectors) => {
                            info!(run_id = %job.run_id, vector_count = vectors.len(), "segments embedded");
                            state.vectors = Some(vectors);
                            self.advance(&mut state, PipelineStep::Storing).await?;
                        }
                        Err(error) => self.fail(&mut state, PipelineStep::Embedding, error).await?,
                    }
                }
                PipelineStep::Storing => {
                    let segments = required_segments(&state)?;
                    let vectors = state.vectors.clone().ok_or_else(|| PipelineError::CorruptState {
                        run_id: job.run_id.clone(),
                        details: "storing step without persisted vectors".to_string(),
                    })?;
                    let outcome = self
                        .attempt_step(&mut state, &self.policies.store, |a| &mut a.store, || {
                            self.store.run(&job, &segments, &vectors)
                        })
                        .await?;
                    match outcome {
                        Ok(receipt) => {
                            info!(run_id = %job.run_id, inserted = receipt.inserted_count, "vectors stored");
                            state.receipt = Some(receipt);
                            // The vector payload is no longer needed once the
                            // receipt is durable.
                            state.vectors = None;
                            self.advance(&mut state, PipelineStep::Completed).await?;
                        }
                        Err(error) => self.fail(&mut state, PipelineStep::Storing, error).await?,
                    }
                }
                PipelineStep::Completed | PipelineStep::Failed => break,
            }
        }

        Ok(state)
    }

    /// Runs one activity under its retry policy, persisting the attempt
    /// counter and last error after every try. Returns the activity's final
    /// verdict; the outer Result is reserved for persistence failures.
    async fn attempt_step<T, F, Fut>(
        &self,
        state: &mut PipelineState,
        policy: &RetryPolicy,
        counter: fn(&mut StepAttempts) -> &mut u32,
        op: F,
    ) -> Result<Result<T, ActivityError>, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        loop {
            *counter(&mut state.attempts) += 1;
            self.checkpoint(state).await?;

            match op().await {
                Ok(value) => return Ok(Ok(value)),
                Err(error) => {
                    let attempt = *counter(&mut state.attempts);
                    state.last_error = Some(error.clone());
                    self.checkpoint(state).await?;

                    match policy.decide(&error, attempt) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                run_id = %state.job.run_id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                %error,
                                "step failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Fatal => return Ok(Err(error)),
                    }
                }
            }
        }
    }

    /// Persists state without clobbering a cancel request written through
    /// the state store while an activity was in flight.
    async fn checkpoint(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        if !state.cancel_requested {
            if let Some(stored) = self.states.load(&state.job.run_id).await? {
                state.cancel_requested = stored.cancel_requested;
            }
        }
        state.touch();
        self.states.save(state).await
    }

    async fn advance(&self, state: &mut PipelineState, next: PipelineStep) -> Result<(), PipelineError> {
        state.step = next;
        self.checkpoint(state).await
    }

    async fn fail(
        &self,
        state: &mut PipelineState,
        step: PipelineStep,
        error: ActivityError,
    ) -> Result<(), PipelineError> {
        warn!(run_id = %state.job.run_id, step = step.as_str(), %error, "job failed");
        self.release_staging(state).await;
        state.failure = Some(StepFailure {
            step,
            kind: Some(error.kind),
            message: error.message.clone(),
        });
        state.last_error = Some(error);
        state.step = PipelineStep::Failed;
        self.checkpoint(state).await
    }

    async fn cancel(&self, state: &mut PipelineState) -> Result<(), PipelineError> {
        info!(run_id = %state.job.run_id, step = state.step.as_str(), "cancelling job");
        self.release_staging(state).await;
        state.failure = Some(StepFailure {
            step: state.step,
            kind: None,
            message: "cancelled by caller".to_string(),
        });
        state.step = PipelineStep::Failed;
        self.checkpoint(state).await
    }

    async fn release_staging(&self, state: &PipelineState) {
        let Some(staged) = &state.staged else { return };
        match tokio::fs::remove_file(&staged.local_path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                warn!(path = %staged.local_path.display(), %error, "could not remove staged file");
            }
        }
    }
}

fn required_segments(state: &PipelineState) -> Result<Vec<TextSegment>, PipelineError> {
    state.segments.clone().ok_or_else(|| PipelineError::CorruptState {
        run_id: state.job.run_id.clone(),
        details: format!("{} step without persisted segments", state.step.as_str()),
    })
}

/// Submission interface: persists the initial state, enqueues the job, and
/// returns a handle that can be polled or awaited for the terminal result.
pub async fn submit_job(
    queue: &dyn TaskQueue,
    states: Arc<dyn StateStore>,
    document_id: impl Into<String>,
    source_url: impl Into<String>,
) -> Result<JobHandle, PipelineError> {
    let job = DocumentJob::new(document_id, source_url);
    states.save(&PipelineState::new(job.clone())).await?;
    queue.enqueue(&job).await?;
    info!(run_id = %job.run_id, document_id = %job.document_id, "job submitted");
    Ok(JobHandle::new(job.run_id, states))
}

pub struct JobHandle {
    run_id: String,
    states: Arc<dyn StateStore>,
    poll_interval: Duration,
}

impl JobHandle {
    pub fn new(run_id: impl Into<String>, states: Arc<dyn StateStore>) -> Self {
        Self {
            run_id: run_id.into(),
            states,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn status(&self) -> Result<Option<PipelineState>, PipelineError> {
        self.states.load(&self.run_id).await
    }

    /// Blocks until the run reaches Completed or Failed.
    pub async fn wait(&self) -> Result<PipelineState, PipelineError> {
        loop {
            if let Some(state) = self.states.load(&self.run_id).await? {
                if state.step.is_terminal() {
                    return Ok(state);
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
