use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_ingest_core::{
    submit_job, CohereClient, FileStateStore, LopdfParser, MilvusStore, PipelineOptions,
    PipelineOrchestrator, PipelineState, RetryPolicies, SpoolQueue, StateStore, TaskQueue,
    WorkerPool,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-ingest", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Cohere API base URL
    #[arg(long, default_value = "https://api.cohere.ai")]
    cohere_url: String,

    /// Cohere API key (required for the worker command)
    #[arg(long, env = "CO_API_KEY", hide_env_values = true)]
    cohere_api_key: Option<String>,

    /// Embedding model; must stay fixed for the life of a collection
    #[arg(long, default_value = "embed-english-v2.0")]
    embedding_model: String,

    /// Vector dimension of the embedding model
    #[arg(long, default_value = "4096")]
    embedding_dimension: usize,

    /// Maximum texts per embedding request
    #[arg(long, default_value = "96")]
    max_embed_batch: usize,

    /// Milvus base URL
    #[arg(long, default_value = "http://localhost:19530")]
    milvus_url: String,

    /// Vector store collection
    #[arg(long, default_value = "doc_chunks")]
    collection: String,

    /// Directory for durable run state and the task spool
    #[arg(long, env = "DOC_INGEST_DATA_DIR", default_value = ".doc-ingest")]
    data_dir: String,

    /// Staging directory for downloads (defaults to the system temp dir)
    #[arg(long)]
    staging_dir: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Submit an ingestion job and print its run id.
    Submit {
        /// Caller-supplied document identifier (not required to be unique).
        #[arg(long)]
        document_id: String,
        /// HTTP(S) URL of the document to ingest.
        #[arg(long)]
        url: String,
        /// Block until the job reaches a terminal state.
        #[arg(long, default_value_t = false)]
        wait: bool,
    },
    /// Run pipeline workers until ctrl-c.
    Worker {
        /// Number of concurrent workers.
        #[arg(long, default_value = "4")]
        concurrency: usize,
        /// Seconds before an unacknowledged lease is redelivered.
        #[arg(long, default_value = "60")]
        lease_seconds: u64,
    },
    /// Show the persisted state of one run.
    Status {
        #[arg(long)]
        run_id: String,
    },
    /// List all persisted runs.
    List,
    /// Request cancellation of a run between steps.
    Cancel {
        #[arg(long)]
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let data_dir = PathBuf::from(&cli.data_dir);
    let states = Arc::new(FileStateStore::new(data_dir.join("state")));
    states.init().await.context("cannot initialize state dir")?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-ingest boot"
    );

    match cli.command {
        Command::Submit {
            document_id,
            url,
            wait,
        } => {
            let queue = SpoolQueue::open(data_dir.join("spool"), Duration::from_secs(60))
                .await
                .context("cannot open task spool")?;
            let handle = submit_job(
                &queue,
                states.clone() as Arc<dyn StateStore>,
                document_id,
                url,
            )
            .await
            .context("job submission failed")?;

            println!("run_id: {}", handle.run_id());
            if wait {
                let state = handle.wait().await.context("waiting on run failed")?;
                print_state(&state);
            }
        }
        Command::Worker {
            concurrency,
            lease_seconds,
        } => {
            let api_key = cli
                .cohere_api_key
                .context("CO_API_KEY is not set; the worker cannot embed")?;

            let staging_dir = cli
                .staging_dir
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir);
            tokio::fs::create_dir_all(&staging_dir)
                .await
                .context("cannot create staging dir")?;

            let options = PipelineOptions {
                staging_dir,
                collection: cli.collection,
                embedding_model: cli.embedding_model,
                embedding_dimension: cli.embedding_dimension,
                max_embed_batch: cli.max_embed_batch,
            };

            let http = reqwest::Client::new();
            let orchestrator = Arc::new(PipelineOrchestrator::new(
                options,
                http.clone(),
                LopdfParser,
                CohereClient::new(&cli.cohere_url, api_key, http.clone()),
                MilvusStore::new(&cli.milvus_url, http),
                states.clone() as Arc<dyn StateStore>,
                RetryPolicies::default(),
            ));

            orchestrator
                .bootstrap()
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))
                .context("vector store bootstrap failed")?;

            let queue: Arc<dyn TaskQueue> = Arc::new(
                SpoolQueue::open(data_dir.join("spool"), Duration::from_secs(lease_seconds))
                    .await
                    .context("cannot open task spool")?,
            );

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let pool = WorkerPool::new(queue, orchestrator, concurrency);

            info!(concurrency, lease_seconds, "worker pool starting");
            let pool_task = tokio::spawn(async move { pool.run(shutdown_rx).await });

            tokio::signal::ctrl_c()
                .await
                .context("ctrl-c handler failed")?;
            info!("ctrl-c received, draining workers");
            let _ = shutdown_tx.send(true);
            pool_task.await.context("worker pool task failed")?;
        }
        Command::Status { run_id } => {
            let state = states
                .load(&run_id)
                .await
                .context("cannot load run state")?;
            match state {
                Some(state) => print_state(&state),
                None => println!("no such run: {run_id}"),
            }
        }
        Command::List => {
            let runs = states.list_runs().await.context("cannot list runs")?;
            if runs.is_empty() {
                println!("no runs recorded");
            }
            for run_id in runs {
                if let Some(state) = states.load(&run_id).await.context("cannot load run")? {
                    println!(
                        "{} document_id={} step={} updated_at={}",
                        run_id,
                        state.job.document_id,
                        state.step.as_str(),
                        state.updated_at.to_rfc3339()
                    );
                }
            }
        }
        Command::Cancel { run_id } => {
            states
                .request_cancel(&run_id)
                .await
                .context("cancel request failed")?;
            println!("cancel requested for {run_id}");
        }
    }

    Ok(())
}

fn print_state(state: &PipelineState) {
    println!("run_id: {}", state.job.run_id);
    println!("document_id: {}", state.job.document_id);
    println!("source_url: {}", state.job.source_url);
    println!("step: {}", state.step.as_str());
    println!(
        "attempts: fetch={} parse={} embed={} store={}",
        state.attempts.fetch, state.attempts.parse, state.attempts.embed, state.attempts.store
    );
    if let Some(receipt) = &state.receipt {
        println!("inserted_count: {}", receipt.inserted_count);
    }
    if let Some(failure) = &state.failure {
        match failure.kind {
            Some(kind) => println!(
                "failure: step={} kind={} message={}",
                failure.step.as_str(),
                kind,
                failure.message
            ),
            None => println!("failure: step={} {}", failure.step.as_str(), failure.message),
        }
    }
    println!("updated_at: {}", state.updated_at.to_rfc3339());
}
