use crate::error::PipelineError;
use crate::orchestrator::PipelineOrchestrator;
use crate::queue::TaskQueue;
use crate::traits::{DocumentParser, EmbeddingClient, VectorStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// One worker loop: lease a task, drive it to a terminal state, ack. Any
/// orchestration-level failure (state persistence, corrupt state) nacks the
/// lease so another delivery can try; activity failures are terminal results,
/// not queue errors.
pub struct Worker<P, E, V> {
    id: String,
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<PipelineOrchestrator<P, E, V>>,
    poll_interval: Duration,
}

impl<P, E, V> Worker<P, E, V>
where
    P: DocumentParser,
    E: EmbeddingClient,
    V: VectorStore,
{
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        orchestrator: Arc<PipelineOrchestrator<P, E, V>>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            orchestrator,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Processes at most one task. Returns whether a task was leased.
    pub async fn run_once(&self) -> Result<bool, PipelineError> {
        let Some(lease) = self.queue.lease(&self.id).await? else {
            return Ok(false);
        };

        info!(
            worker = %self.id,
            run_id = %lease.job.run_id,
            delivery_count = lease.delivery_count,
            "task leased"
        );

        match self.orchestrator.run(&lease.job).await {
            Ok(state) => {
                info!(
                    worker = %self.id,
                    run_id = %lease.job.run_id,
                    step = state.step.as_str(),
                    "task finished"
                );
                self.queue.ack(&lease).await?;
                Ok(true)
            }
            Err(error) => {
                warn!(worker = %self.id, run_id = %lease.job.run_id, %error, "task redelivered");
                self.queue.nack(&lease).await?;
                Err(error)
            }
        }
    }

    pub async fn run_until_shutdown(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                info!(worker = %self.id, "worker shutting down");
                return;
            }

            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(error) => {
                    warn!(worker = %self.id, %error, "worker iteration failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// N workers sharing one orchestrator and one queue. Jobs run concurrently
/// across workers; steps within a job stay strictly sequential.
pub struct WorkerPool<P, E, V> {
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<PipelineOrchestrator<P, E, V>>,
    concurrency: usize,
}

impl<P, E, V> WorkerPool<P, E, V>
where
    P: DocumentParser + 'static,
    E: EmbeddingClient + 'static,
    V: VectorStore + 'static,
{
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        orchestrator: Arc<PipelineOrchestrator<P, E, V>>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs until the shutdown signal flips to true and every worker drains.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.concurrency);
        for index in 0..self.concurrency {
            let worker = Worker::new(
                format!("worker-{index}"),
                self.queue.clone(),
                self.orchestrator.clone(),
            );
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run_until_shutdown(shutdown).await;
            }));
        }

        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "worker task aborted");
            }
        }
    }
}
