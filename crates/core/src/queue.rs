use crate::error::PipelineError;
use crate::models::DocumentJob;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub job: DocumentJob,
    pub lease_id: String,
    pub worker_id: String,
    pub deadline: DateTime<Utc>,
    pub delivery_count: u32,
}

/// Durable dispatch with at-least-once semantics: a task is leased to at most
/// one worker at a time, and a lease that outlives its deadline is reclaimed
/// for redelivery.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job: &DocumentJob) -> Result<(), PipelineError>;

    async fn lease(&self, worker_id: &str) -> Result<Option<LeasedTask>, PipelineError>;

    async fn ack(&self, lease: &LeasedTask) -> Result<(), PipelineError>;

    async fn nack(&self, lease: &LeasedTask) -> Result<(), PipelineError>;

    async fn reclaim_expired(&self) -> Result<usize, PipelineError>;
}

struct LeaseEntry {
    job: DocumentJob,
    deadline: DateTime<Utc>,
    delivery_count: u32,
}

struct SpoolInner {
    pending: VecDeque<(DocumentJob, u32)>,
    leased: HashMap<String, LeaseEntry>,
}

/// One JSON file per task in a spool directory. The file lives until ack, so
/// a crashed process recovers its backlog by re-reading the spool; in-flight
/// leases are not persisted, which is exactly the redelivery we want after a
/// worker dies. `lease` rescans the directory, so tasks enqueued by another
/// process over the same spool are dispatched without a restart.
pub struct SpoolQueue {
    dir: PathBuf,
    lease_duration: ChronoDuration,
    inner: Mutex<SpoolInner>,
}

impl SpoolQueue {
    pub async fn open(
        dir: impl Into<PathBuf>,
        lease_duration: std::time::Duration,
    ) -> Result<Self, PipelineError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let lease_duration = ChronoDuration::from_std(lease_duration)
            .map_err(|error| PipelineError::Queue(format!("lease duration out of range: {error}")))?;

        Ok(Self {
            dir,
            lease_duration,
            inner: Mutex::new(SpoolInner {
                pending: VecDeque::new(),
                leased: HashMap::new(),
            }),
        })
    }

    fn task_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.task.json"))
    }

    /// Admits spool files this instance has not seen yet: submissions from
    /// other processes and the backlog left by a previous incarnation.
    async fn scan_spool(&self, inner: &mut SpoolInner) -> Result<(), PipelineError> {
        let mut known: HashSet<String> = inner
            .pending
            .iter()
            .map(|(job, _)| job.run_id.clone())
            .collect();
        known.extend(inner.leased.values().map(|entry| entry.job.run_id.clone()));

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(run_id) = name.strip_suffix(".task.json") else {
                continue;
            };
            if known.contains(run_id) {
                continue;
            }

            let raw = match tokio::fs::read_to_string(entry.path()).await {
                Ok(raw) => raw,
                // Acked between the directory listing and the read.
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            match serde_json::from_str::<DocumentJob>(&raw) {
                Ok(job) => {
                    if known.insert(job.run_id.clone()) {
                        inner.pending.push_back((job, 0));
                    }
                }
                Err(error) => {
                    warn!(file = name, %error, "skipping unreadable task file");
                }
            }
        }
        Ok(())
    }

    fn reclaim_locked(inner: &mut SpoolInner) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = inner
            .leased
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(lease_id, _)| lease_id.clone())
            .collect();

        for lease_id in &expired {
            if let Some(entry) = inner.leased.remove(lease_id) {
                warn!(
                    run_id = %entry.job.run_id,
                    delivery_count = entry.delivery_count,
                    "lease expired, task returned to pending"
                );
                inner.pending.push_back((entry.job, entry.delivery_count));
            }
        }
        expired.len()
    }
}

#[async_trait]
impl TaskQueue for SpoolQueue {
    async fn enqueue(&self, job: &DocumentJob) -> Result<(), PipelineError> {
        let encoded = serde_json::to_vec_pretty(job)?;
        let target = self.task_path(&job.run_id);
        let staging = self.dir.join(format!("{}.task.json.tmp", job.run_id));

        // Same temp-then-rename discipline as the state store: a crash
        // mid-write must not leave a torn task file behind.
        tokio::fs::write(&staging, &encoded).await?;
        tokio::fs::rename(&staging, &target).await?;

        let mut inner = self.inner.lock().await;
        inner.pending.push_back((job.clone(), 0));
        Ok(())
    }

    async fn lease(&self, worker_id: &str) -> Result<Option<LeasedTask>, PipelineError> {
        let mut inner = self.inner.lock().await;
        Self::reclaim_locked(&mut inner);
        self.scan_spool(&mut inner).await?;

        let Some((job, prior_deliveries)) = inner.pending.pop_front() else {
            return Ok(None);
        };

        let lease_id = Uuid::new_v4().to_string();
        let deadline = Utc::now() + self.lease_duration;
        let delivery_count = prior_deliveries + 1;
        inner.leased.insert(
            lease_id.clone(),
            LeaseEntry {
                job: job.clone(),
                deadline,
                delivery_count,
            },
        );

        Ok(Some(LeasedTask {
            job,
            lease_id,
            worker_id: worker_id.to_string(),
            deadline,
            delivery_count,
        }))
    }

    async fn ack(&self, lease: &LeasedTask) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        if inner.leased.remove(&lease.lease_id).is_none() {
            // The lease expired and the task was handed elsewhere; the other
            // delivery owns completion now.
            return Ok(());
        }

        // Removed under the lock so a concurrent scan cannot re-admit the
        // task between the registry update and the unlink.
        match tokio::fs::remove_file(self.task_path(&lease.job.run_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn nack(&self, lease: &LeasedTask) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.leased.remove(&lease.lease_id) {
            inner.pending.push_back((entry.job, entry.delivery_count));
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, PipelineError> {
        let mut inner = self.inner.lock().await;
        Ok(Self::reclaim_locked(&mut inner))
    }
}

#[cfg(test)]
mod tests {
    use super::{SpoolQueue, TaskQueue};
    use crate::models::DocumentJob;
    use std::time::Duration;
    use tempfile::tempdir;

    fn job() -> DocumentJob {
        DocumentJob::new("doc-1", "https://example.com/a.pdf")
    }

    #[tokio::test]
    async fn acked_task_is_never_redelivered() {
        let dir = tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open");

        queue.enqueue(&job()).await.expect("enqueue");
        let lease = queue.lease("w1").await.expect("lease").expect("task");
        queue.ack(&lease).await.expect("ack");

        assert!(queue.lease("w1").await.expect("lease").is_none());

        // The spool file is gone, so a restart sees nothing either.
        let reopened = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("reopen");
        assert!(reopened.lease("w1").await.expect("lease").is_none());
    }

    #[tokio::test]
    async fn a_leased_task_is_invisible_to_other_workers() {
        let dir = tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open");

        queue.enqueue(&job()).await.expect("enqueue");
        let _lease = queue.lease("w1").await.expect("lease").expect("task");
        assert!(queue.lease("w2").await.expect("lease").is_none());
    }

    #[tokio::test]
    async fn nacked_task_goes_back_to_pending() {
        let dir = tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open");

        queue.enqueue(&job()).await.expect("enqueue");
        let lease = queue.lease("w1").await.expect("lease").expect("task");
        queue.nack(&lease).await.expect("nack");

        let redelivered = queue.lease("w2").await.expect("lease").expect("task");
        assert_eq!(redelivered.job.run_id, lease.job.run_id);
        assert_eq!(redelivered.delivery_count, 2);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_for_redelivery() {
        let dir = tempdir().expect("tempdir");
        let queue = SpoolQueue::open(dir.path(), Duration::from_millis(10))
            .await
            .expect("open");

        queue.enqueue(&job()).await.expect("enqueue");
        let lease = queue.lease("w1").await.expect("lease").expect("task");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(queue.reclaim_expired().await.expect("reclaim"), 1);

        let redelivered = queue.lease("w2").await.expect("lease").expect("task");
        assert_eq!(redelivered.job.run_id, lease.job.run_id);

        // The dead worker's stale ack must not remove the redelivered task.
        queue.ack(&lease).await.expect("stale ack");
        queue.ack(&redelivered).await.expect("live ack");
    }

    #[tokio::test]
    async fn tasks_enqueued_by_another_process_are_dispatched_without_a_restart() {
        let dir = tempdir().expect("tempdir");
        let worker_queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open worker queue");
        let submit_queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open submit queue");

        let submitted = job();
        submit_queue.enqueue(&submitted).await.expect("enqueue");

        let lease = worker_queue.lease("w1").await.expect("lease").expect("task");
        assert_eq!(lease.job.run_id, submitted.run_id);

        // A later scan must not re-admit the task while it is leased or
        // after it is acked.
        assert!(worker_queue.lease("w2").await.expect("lease").is_none());
        worker_queue.ack(&lease).await.expect("ack");
        assert!(worker_queue.lease("w2").await.expect("lease").is_none());
    }

    #[tokio::test]
    async fn enqueue_never_leaves_a_partially_written_task_visible() {
        let dir = tempdir().expect("tempdir");
        // What a crash mid-write would leave behind.
        std::fs::write(dir.path().join("dead-run.task.json.tmp"), b"{\"document_id\":")
            .expect("write stray file");

        let queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("open");
        assert!(queue.lease("w1").await.expect("lease").is_none());

        let submitted = job();
        queue.enqueue(&submitted).await.expect("enqueue");

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&format!("{}.task.json", submitted.run_id)));
        assert!(!names.contains(&format!("{}.task.json.tmp", submitted.run_id)));
    }

    #[tokio::test]
    async fn unacked_tasks_survive_a_restart() {
        let dir = tempdir().expect("tempdir");
        let submitted = job();
        {
            let queue = SpoolQueue::open(dir.path(), Duration::from_secs(30))
                .await
                .expect("open");
            queue.enqueue(&submitted).await.expect("enqueue");
            let _lease = queue.lease("w1").await.expect("lease").expect("task");
            // Process dies here: no ack, lease state lost.
        }

        let reopened = SpoolQueue::open(dir.path(), Duration::from_secs(30))
            .await
            .expect("reopen");
        let recovered = reopened.lease("w1").await.expect("lease").expect("task");
        assert_eq!(recovered.job.run_id, submitted.run_id);
    }
}
