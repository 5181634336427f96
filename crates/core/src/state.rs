use crate::error::PipelineError;
use crate::models::PipelineState;
use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

/// Durable record of pipeline progress, keyed by run id. Must survive the
/// crash of any single worker.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &PipelineState) -> Result<(), PipelineError>;

    async fn load(&self, run_id: &str) -> Result<Option<PipelineState>, PipelineError>;

    async fn list_runs(&self) -> Result<Vec<String>, PipelineError>;

    async fn request_cancel(&self, run_id: &str) -> Result<(), PipelineError>;
}

/// One JSON document per run, written via temp file + rename so a crashed
/// writer never leaves a half-written state behind.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub async fn init(&self) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, state: &PipelineState) -> Result<(), PipelineError> {
        let encoded = serde_json::to_vec_pretty(state)?;
        let target = self.path_for(&state.job.run_id);
        let staging = self.dir.join(format!("{}.json.tmp", state.job.run_id));

        tokio::fs::write(&staging, &encoded).await?;
        tokio::fs::rename(&staging, &target).await?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<PipelineState>, PipelineError> {
        let raw = match tokio::fs::read_to_string(self.path_for(run_id)).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let state =
            serde_json::from_str(&raw).map_err(|error| PipelineError::CorruptState {
                run_id: run_id.to_string(),
                details: error.to_string(),
            })?;
        Ok(Some(state))
    }

    async fn list_runs(&self) -> Result<Vec<String>, PipelineError> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(run_id) = name.strip_suffix(".json") {
                runs.push(run_id.to_string());
            }
        }

        runs.sort_unstable();
        Ok(runs)
    }

    async fn request_cancel(&self, run_id: &str) -> Result<(), PipelineError> {
        let mut state = self
            .load(run_id)
            .await?
            .ok_or_else(|| PipelineError::UnknownRun(run_id.to_string()))?;

        state.cancel_requested = true;
        state.touch();
        self.save(&state).await
    }
}
