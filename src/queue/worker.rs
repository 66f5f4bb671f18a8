//! In-process work queue and dispatch worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::{DeliveryDispatcher, DispatchOutcome};
use crate::error::{RelayError, Result};

use super::backoff::{BackoffPolicy, retry_with_backoff};

/// Unit of work: one reminder to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub reminder_id: String,
}

impl DispatchJob {
    pub fn new(reminder_id: impl Into<String>) -> Self {
        Self {
            reminder_id: reminder_id.into(),
        }
    }
}

/// Sending half of the job queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DispatchJob>,
}

/// Receiving half, shared by every worker in a pool.
pub struct JobReceiver {
    rx: mpsc::Receiver<DispatchJob>,
}

/// Bounded job queue; senders wait when it is full.
pub fn job_queue(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    /// # Errors
    ///
    /// Returns [`RelayError::Queue`] if every receiver is gone.
    pub async fn enqueue(&self, job: DispatchJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|e| RelayError::Queue(format!("queue closed; dropped job {}", e.0.reminder_id)))
    }

    /// Enqueue after `delay` from a detached task.
    pub fn enqueue_after(&self, job: DispatchJob, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.enqueue(job).await {
                warn!(error = %e, "delayed requeue dropped; the claim will lapse to the sweep");
            }
        });
    }
}

impl JobReceiver {
    /// Next job, or `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<DispatchJob> {
        self.rx.recv().await
    }

    /// Next job if one is ready now.
    pub fn try_recv(&mut self) -> Option<DispatchJob> {
        self.rx.try_recv().ok()
    }
}

/// Emitted once per processed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Completed {
        reminder_id: String,
        outcome: DispatchOutcome,
    },
    /// Infrastructure retries ran out; the job needs operator attention.
    Abandoned {
        reminder_id: String,
        attempts: u32,
        error: String,
    },
}

impl DispatchEvent {
    pub fn reminder_id(&self) -> &str {
        match self {
            Self::Completed { reminder_id, .. } | Self::Abandoned { reminder_id, .. } => {
                reminder_id
            }
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Attempts per job for infrastructure failures.
    pub infra_max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            infra_max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl From<&crate::config::WorkerConfig> for WorkerSettings {
    fn from(config: &crate::config::WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            infra_max_attempts: config.infra_max_attempts,
            backoff: config.backoff(),
        }
    }
}

/// Dispatch workers sharing one [`JobReceiver`].
pub struct WorkerPool {
    workers: JoinSet<()>,
}

impl WorkerPool {
    /// Spawn `settings.concurrency` workers (at least one).
    ///
    /// `queue` is used for immediate-retry requeues. Workers stop when
    /// `cancel` fires or the queue closes.
    pub fn spawn(
        dispatcher: Arc<DeliveryDispatcher>,
        receiver: JobReceiver,
        queue: JobQueue,
        settings: WorkerSettings,
        events: mpsc::UnboundedSender<DispatchEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut workers = JoinSet::new();
        for worker_id in 0..settings.concurrency.max(1) {
            let worker = Worker {
                id: worker_id,
                dispatcher: Arc::clone(&dispatcher),
                receiver: Arc::clone(&receiver),
                queue: queue.clone(),
                settings: settings.clone(),
                events: events.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        info!(workers = settings.concurrency.max(1), "dispatch workers started");
        Self { workers }
    }

    /// Wait for every worker to exit.
    pub async fn join(mut self) {
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "dispatch worker panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    dispatcher: Arc<DeliveryDispatcher>,
    receiver: Arc<Mutex<JobReceiver>>,
    queue: JobQueue,
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<DispatchEvent>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => break,
                job = async { self.receiver.lock().await.recv().await } => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.process(job).await;
        }
        debug!(worker = self.id, "dispatch worker stopped");
    }

    async fn process(&self, job: DispatchJob) {
        let event = dispatch_with_retry(&self.dispatcher, &job.reminder_id, &self.settings).await;
        if let DispatchEvent::Completed {
            outcome:
                DispatchOutcome::RetryScheduled {
                    requeue_after: Some(delay),
                    ..
                },
            ..
        } = &event
        {
            debug!(reminder_id = %job.reminder_id, ?delay, "requeueing for immediate retry");
            self.queue.enqueue_after(job, *delay);
        }
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Run one dispatch of an already-claimed reminder under the bounded
/// infrastructure retry, turning the result into a [`DispatchEvent`].
pub async fn dispatch_with_retry(
    dispatcher: &Arc<DeliveryDispatcher>,
    reminder_id: &str,
    settings: &WorkerSettings,
) -> DispatchEvent {
    let result = retry_with_backoff(
        |_attempt| {
            let dispatcher = Arc::clone(dispatcher);
            let reminder_id = reminder_id.to_owned();
            async move { dispatcher.dispatch(&reminder_id).await }
        },
        settings.infra_max_attempts,
        &settings.backoff,
    )
    .await;

    match result {
        Ok(outcome) => DispatchEvent::Completed {
            reminder_id: reminder_id.to_owned(),
            outcome,
        },
        Err(exhausted) => {
            error!(
                reminder_id,
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "dispatch abandoned after infrastructure failures"
            );
            DispatchEvent::Abandoned {
                reminder_id: reminder_id.to_owned(),
                attempts: exhausted.attempts,
                error: exhausted.last_error.to_string(),
            }
        }
    }
}
