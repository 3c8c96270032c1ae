use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use uuid::Uuid;

use crate::error::MlError;
use crate::services::trainer::TrainingOutput;

/// Process-wide limits for training work. Model fitting is CPU- and
/// memory-heavy, so admission is capped regardless of inbound request volume.
#[derive(Debug, Clone, Copy)]
pub struct JobRunnerConfig {
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 20,
        }
    }
}

struct QueuedJob {
    id: Uuid,
    label: String,
    run: Box<dyn FnOnce() -> Result<TrainingOutput, MlError> + Send + 'static>,
    result_tx: oneshot::Sender<Result<TrainingOutput, MlError>>,
    // Held until the worker finishes the job, successfully or not. A caller
    // that stops waiting does not free the slot early.
    _permit: OwnedSemaphorePermit,
}

/// Capacity-bounded runner for training jobs.
///
/// A semaphore of `max_concurrent` permits gates admission and a bounded
/// queue holds admitted jobs for the single background worker thread, which
/// executes them serially off the async request path. Construct exactly once
/// per process and share by cloning; the worker thread starts in the
/// constructor.
#[derive(Clone)]
pub struct JobRunner {
    semaphore: Arc<Semaphore>,
    queue: SyncSender<QueuedJob>,
}

impl JobRunner {
    pub fn new(config: JobRunnerConfig) -> Self {
        let (queue, jobs) = mpsc::sync_channel(config.queue_capacity);
        thread::Builder::new()
            .name("training-worker".to_string())
            .spawn(move || worker_loop(jobs))
            .expect("failed to spawn training worker thread");
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            queue,
        }
    }

    /// Submit a job and await its private result channel.
    ///
    /// Fails fast with [`MlError::Busy`] when no training slot is free, and
    /// with a distinct busy message when the backlog queue is full. The job's
    /// own `Ok`/`Err` value is delivered through the channel, so the caller
    /// observes the original failure rather than a generic one. Jobs are
    /// never retried here.
    pub async fn submit<F>(&self, label: &str, job: F) -> Result<TrainingOutput, MlError>
    where
        F: FnOnce() -> Result<TrainingOutput, MlError> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| MlError::Busy("server is busy, please try again later".to_string()))?;

        let (result_tx, result_rx) = oneshot::channel();
        let queued = QueuedJob {
            id: Uuid::new_v4(),
            label: label.to_string(),
            run: Box::new(job),
            result_tx,
            _permit: permit,
        };
        tracing::info!("Queueing training job {} ({})", queued.id, queued.label);

        self.queue.try_send(queued).map_err(|e| match e {
            TrySendError::Full(_) => {
                MlError::Busy("training queue is full, please try again later".to_string())
            }
            TrySendError::Disconnected(_) => {
                MlError::Training("training worker is not running".to_string())
            }
        })?;

        match result_rx.await {
            Ok(result) => result,
            Err(_) => Err(MlError::Training(
                "training worker dropped the job".to_string(),
            )),
        }
    }
}

fn worker_loop(jobs: Receiver<QueuedJob>) {
    while let Ok(job) = jobs.recv() {
        let QueuedJob {
            id,
            label,
            run,
            result_tx,
            _permit,
        } = job;

        tracing::info!("Training job {} started ({})", id, label);
        let result = run();
        match &result {
            Ok(_) => tracing::info!("Training job {} finished", id),
            Err(e) => tracing::warn!("Training job {} failed: {}", id, e),
        }

        if result_tx.send(result).is_err() {
            tracing::warn!("Discarding result of training job {}: caller is gone", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::features::{PriceTick, normalize_prices};
    use crate::services::trainer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::SyncSender as GateSender;

    fn stub_output() -> Result<TrainingOutput, MlError> {
        let ticks: Vec<PriceTick> = (0..8)
            .map(|i| {
                let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64);
                PriceTick {
                    time: format!("{} 00:", date.format("%b %d %Y")),
                    price: 10.0 + i as f64,
                    volume: 1.0,
                }
            })
            .collect();
        trainer::train_and_evaluate(&normalize_prices(&ticks).unwrap())
    }

    /// Job that signals entry and then blocks until the gate opens.
    fn gated_job(
        entered: GateSender<()>,
        gate: std::sync::mpsc::Receiver<()>,
    ) -> impl FnOnce() -> Result<TrainingOutput, MlError> + Send + 'static {
        move || {
            let _ = entered.send(());
            let _ = gate.recv();
            stub_output()
        }
    }

    #[tokio::test]
    async fn delivers_job_result() {
        let runner = JobRunner::new(JobRunnerConfig::default());
        let output = runner.submit("test", stub_output).await.unwrap();
        assert!(output.metrics.mse >= 0.0);
    }

    #[tokio::test]
    async fn delivers_job_error_unchanged() {
        let runner = JobRunner::new(JobRunnerConfig::default());
        let err = runner
            .submit("test", || {
                Err(MlError::Training("degenerate feature matrix".to_string()))
            })
            .await
            .unwrap_err();
        match err {
            MlError::Training(reason) => assert_eq!(reason, "degenerate feature matrix"),
            other => panic!("expected Training error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_when_no_slot_is_free() {
        let runner = JobRunner::new(JobRunnerConfig {
            max_concurrent: 1,
            queue_capacity: 20,
        });

        let (entered_tx, entered_rx) = mpsc::sync_channel(1);
        let (gate_tx, gate_rx) = mpsc::sync_channel::<()>(1);

        let running = {
            let runner = runner.clone();
            let job = gated_job(entered_tx, gate_rx);
            tokio::spawn(async move { runner.submit("blocker", job).await })
        };
        entered_rx.recv().unwrap();

        let err = runner.submit("rejected", stub_output).await.unwrap_err();
        match err {
            MlError::Busy(reason) => assert!(reason.contains("busy")),
            other => panic!("expected Busy error, got {other:?}"),
        }

        gate_tx.send(()).unwrap();
        assert!(running.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reports_full_queue_distinctly() {
        let runner = JobRunner::new(JobRunnerConfig {
            max_concurrent: 3,
            queue_capacity: 1,
        });

        let (entered_tx, entered_rx) = mpsc::sync_channel(1);
        let (gate_tx, gate_rx) = mpsc::sync_channel::<()>(1);

        // First job occupies the worker, second fills the queue.
        let first = {
            let runner = runner.clone();
            let job = gated_job(entered_tx, gate_rx);
            tokio::spawn(async move { runner.submit("blocker", job).await })
        };
        entered_rx.recv().unwrap();
        let second = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.submit("queued", stub_output).await })
        };
        // Wait until the queued job took its permit, then let it reach the channel.
        while runner.semaphore.available_permits() > 1 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let err = runner.submit("rejected", stub_output).await.unwrap_err();
        match err {
            MlError::Busy(reason) => assert!(reason.contains("queue is full")),
            other => panic!("expected Busy error, got {other:?}"),
        }

        gate_tx.send(()).unwrap();
        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn caps_concurrent_executions() {
        let runner = JobRunner::new(JobRunnerConfig {
            max_concurrent: 2,
            queue_capacity: 20,
        });

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..4 {
            let runner = runner.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                runner
                    .submit(&format!("job {i}"), move || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(30));
                        active.fetch_sub(1, Ordering::SeqCst);
                        stub_output()
                    })
                    .await
            }));
        }

        let mut completed = 0;
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(MlError::Busy(_)) => busy += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(completed >= 2);
        assert_eq!(completed + busy, 4);
    }
}
