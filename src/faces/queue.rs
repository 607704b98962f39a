//! Single-worker FIFO of visitor events.
//!
//! Jobs run strictly one at a time in enqueue order. A failing, panicking or
//! timed-out job is reported to the handler and dropped; the worker moves on.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::ProcessingJob;
use crate::config::QueueConfig;
use crate::error::{FaceError, FaceResult};

/// Work performed for each dequeued job.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &ProcessingJob) -> FaceResult<()>;

    /// Called once for a job that failed, panicked or timed out.
    async fn on_failure(&self, job: &ProcessingJob, error: &FaceError);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

enum JobOutcome {
    Completed,
    Failed(FaceError),
    TimedOut(FaceError),
}

/// Handle to the queue worker.
pub struct ProcessingQueue {
    tx: mpsc::UnboundedSender<ProcessingJob>,
    pending: Arc<AtomicUsize>,
    worker: JoinHandle<QueueStats>,
}

impl ProcessingQueue {
    /// Start the worker on the current tokio runtime.
    pub fn new(handler: Arc<dyn JobHandler>, cooldown: Duration, job_timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = tokio::spawn(worker_loop(
            rx,
            handler,
            pending.clone(),
            cooldown,
            job_timeout,
        ));

        Self { tx, pending, worker }
    }

    pub fn from_config(handler: Arc<dyn JobHandler>, config: &QueueConfig) -> Self {
        Self::new(handler, config.cooldown(), config.job_timeout())
    }

    /// Queue an event. Never waits for the worker.
    pub fn enqueue(&self, event_id: i64, image_url: impl Into<String>) -> FaceResult<()> {
        let job = ProcessingJob::new(event_id, image_url);
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(FaceError::QueueClosed);
        }
        tracing::debug!(event_id, pending = self.pending(), "Queued face processing job");
        Ok(())
    }

    /// Jobs queued but not yet started.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, finish the ones already queued and report totals.
    pub async fn shutdown(self) -> QueueStats {
        drop(self.tx);
        match self.worker.await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!(error = %e, "Queue worker ended abnormally");
                QueueStats::default()
            }
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<ProcessingJob>,
    handler: Arc<dyn JobHandler>,
    pending: Arc<AtomicUsize>,
    cooldown: Duration,
    job_timeout: Option<Duration>,
) -> QueueStats {
    let mut stats = QueueStats::default();
    let mut last_finished: Option<Instant> = None;

    while let Some(job) = rx.recv().await {
        pending.fetch_sub(1, Ordering::SeqCst);

        if let Some(finished) = last_finished {
            tokio::time::sleep_until(finished + cooldown).await;
        }

        let started = Instant::now();
        tracing::info!(event_id = job.event_id, image_url = %job.image_url, "Processing face job");

        match run_job(&handler, &job, job_timeout).await {
            JobOutcome::Completed => {
                stats.completed += 1;
                tracing::info!(
                    event_id = job.event_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Face job finished"
                );
            }
            JobOutcome::Failed(e) => {
                stats.failed += 1;
                tracing::error!(event_id = job.event_id, error = %e, "Face job failed");
                handler.on_failure(&job, &e).await;
            }
            JobOutcome::TimedOut(e) => {
                stats.timed_out += 1;
                tracing::error!(event_id = job.event_id, error = %e, "Face job abandoned");
                handler.on_failure(&job, &e).await;
            }
        }

        last_finished = Some(Instant::now());
    }

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        timed_out = stats.timed_out,
        "Face queue drained"
    );
    stats
}

/// Run one job on its own task so a panic stays contained.
async fn run_job(
    handler: &Arc<dyn JobHandler>,
    job: &ProcessingJob,
    job_timeout: Option<Duration>,
) -> JobOutcome {
    let task_handler = handler.clone();
    let task_job = job.clone();
    let mut task = tokio::spawn(async move { task_handler.handle(&task_job).await });

    let joined = match job_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                // Cancellation lands at the task's next await point.
                let _ = task.await;
                return JobOutcome::TimedOut(FaceError::Timeout {
                    event_id: job.event_id,
                    timeout: limit,
                });
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(())) => JobOutcome::Completed,
        Ok(Err(e)) => JobOutcome::Failed(e),
        Err(join_err) if join_err.is_panic() => JobOutcome::Failed(FaceError::Panicked {
            event_id: job.event_id,
        }),
        Err(_) => JobOutcome::Failed(FaceError::QueueClosed),
    }
}
