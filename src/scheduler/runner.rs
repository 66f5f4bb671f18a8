//! Scheduler background loop.
//!
//! Each tick releases stale claims, then claims due reminders batch by batch
//! and fans them out to the job queue. Delivery happens in the workers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::{RelayError, Result};
use crate::queue::{DispatchJob, JobQueue};
use crate::store::ReminderStore;

/// Scheduler knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    pub batch_size: usize,
    /// Claims older than this are considered orphaned.
    pub lock_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            batch_size: config.batch_size,
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub released_stale: usize,
    pub claimed: usize,
    pub batches: usize,
    /// Ids enqueued this tick, in claim order.
    pub reminder_ids: Vec<String>,
}

/// Claims due reminders and enqueues one job per reminder.
pub struct Scheduler {
    store: Arc<dyn ReminderStore>,
    queue: JobQueue,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        queue: JobQueue,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> SchedulerSettings {
        self.settings
    }

    /// One scheduler pass.
    ///
    /// Claims until a batch comes back empty or short. A batch that returns
    /// a reminder already claimed earlier in the same pass (a failure
    /// released for the next sweep and picked up again) is still enqueued,
    /// but ends the pass.
    ///
    /// # Errors
    ///
    /// Store failures while sweeping or claiming, or a closed queue.
    pub async fn dispatch_due_reminders(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let batch_size = self.settings.batch_size.max(1);

        let lock_timeout = chrono::Duration::from_std(self.settings.lock_timeout)
            .map_err(|e| RelayError::Scheduler(format!("lock timeout out of range: {e}")))?;
        let cutoff = self.clock.now() - lock_timeout;
        report.released_stale = self.store.release_stale_claims(cutoff)?;
        if report.released_stale > 0 {
            info!(count = report.released_stale, "released stale reminder claims");
        }

        let mut seen = HashSet::new();
        loop {
            let batch = self
                .store
                .fetch_batch_for_processing(batch_size, self.clock.now())?;
            if batch.is_empty() {
                break;
            }
            report.batches += 1;
            report.claimed += batch.len();
            debug!(batch = report.batches, size = batch.len(), "claimed reminder batch");

            let short = batch.len() < batch_size;
            let mut repeated = false;
            for reminder in batch {
                repeated |= !seen.insert(reminder.id.clone());
                report.reminder_ids.push(reminder.id.clone());
                self.queue.enqueue(DispatchJob::new(reminder.id)).await?;
            }
            if repeated {
                debug!("reclaimed a reminder released during this pass; ending pass");
                break;
            }
            if short {
                break;
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                batches = report.batches,
                "enqueued due reminders"
            );
        }
        Ok(report)
    }

    /// Tick every `tick_interval` until `cancel` fires.
    pub fn run(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.settings.tick_interval.as_secs(),
                batch_size = self.settings.batch_size,
                "scheduler started"
            );
            let period = self.settings.tick_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if let Err(e) = self.dispatch_due_reminders().await {
                    error!(error = %e, "scheduler tick failed");
                }
            }
            info!("scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::clock::FixedClock;
    use crate::queue::{JobReceiver, job_queue};
    use crate::store::{NewReminder, SqliteReminderStore, User};
    use chrono::{DateTime, TimeZone, Utc};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 20, 12, 0, 0).unwrap()
    }

    fn seed(store: &SqliteReminderStore, count: usize, remind_at: DateTime<Utc>) -> Vec<String> {
        store
            .upsert_user(&User {
                id: "u-1".to_owned(),
                email: Some("ada@example.com".to_owned()),
                phone: None,
                push_token: None,
            })
            .unwrap();
        let obligation = store
            .create_obligation("u-1", "Tax return", remind_at)
            .unwrap();
        (0..count)
            .map(|_| {
                store
                    .create_reminder(
                        &NewReminder {
                            obligation_id: obligation.id.clone(),
                            remind_at,
                            max_retries: 3,
                        },
                        remind_at,
                    )
                    .unwrap()
                    .id
            })
            .collect()
    }

    fn drain(rx: &mut JobReceiver) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(job) = rx.try_recv() {
            ids.push(job.reminder_id);
        }
        ids
    }

    fn scheduler(
        store: Arc<SqliteReminderStore>,
        clock: Arc<FixedClock>,
        batch_size: usize,
        capacity: usize,
    ) -> (Scheduler, JobReceiver) {
        let (queue, rx) = job_queue(capacity);
        let settings = SchedulerSettings {
            tick_interval: Duration::from_secs(60),
            batch_size,
            lock_timeout: Duration::from_secs(900),
        };
        (Scheduler::new(store, queue, clock, settings), rx)
    }

    #[tokio::test]
    async fn every_due_reminder_is_enqueued_exactly_once() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(noon()));
        let mut expected = seed(&store, 1000, noon());
        let (scheduler, mut rx) = scheduler(store.clone(), clock, 200, 2000);

        let report = scheduler.dispatch_due_reminders().await.unwrap();
        assert_eq!(report.claimed, 1000);
        assert_eq!(report.batches, 5);

        let mut enqueued = drain(&mut rx);
        assert_eq!(enqueued.len(), 1000);
        enqueued.sort();
        expected.sort();
        assert_eq!(enqueued, expected);

        let second = scheduler.dispatch_due_reminders().await.unwrap();
        assert_eq!(second.claimed, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn future_reminders_are_left_alone() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(noon()));
        seed(&store, 3, noon() + chrono::Duration::hours(1));
        let (scheduler, mut rx) = scheduler(store, clock.clone(), 10, 10);

        assert_eq!(scheduler.dispatch_due_reminders().await.unwrap().claimed, 0);
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(scheduler.dispatch_due_reminders().await.unwrap().claimed, 3);
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn orphaned_claims_are_reclaimed_after_lock_timeout() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(noon()));
        let ids = seed(&store, 2, noon());
        let (scheduler, mut rx) = scheduler(store.clone(), clock.clone(), 10, 10);

        // First pass claims; the jobs are then lost, as if the worker died.
        scheduler.dispatch_due_reminders().await.unwrap();
        drain(&mut rx);

        clock.advance(chrono::Duration::minutes(10));
        let report = scheduler.dispatch_due_reminders().await.unwrap();
        assert_eq!(report.released_stale, 0);
        assert_eq!(report.claimed, 0);

        clock.advance(chrono::Duration::minutes(6));
        let report = scheduler.dispatch_due_reminders().await.unwrap();
        assert_eq!(report.released_stale, 2);
        assert_eq!(report.claimed, 2);

        let mut enqueued = drain(&mut rx);
        enqueued.sort();
        let mut ids = ids;
        ids.sort();
        assert_eq!(enqueued, ids);
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(noon()));
        seed(&store, 1, noon());
        let (scheduler, rx) = scheduler(store, clock, 10, 10);
        drop(rx);

        let err = scheduler.dispatch_due_reminders().await.unwrap_err();
        assert!(matches!(err, RelayError::Queue(_)));
    }

    #[tokio::test]
    async fn run_ticks_until_cancelled() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(noon()));
        seed(&store, 4, noon());
        let (queue, mut rx) = job_queue(10);
        let settings = SchedulerSettings {
            tick_interval: Duration::from_millis(10),
            batch_size: 2,
            lock_timeout: Duration::from_secs(900),
        };
        let cancel = CancellationToken::new();
        let handle = Scheduler::new(store, queue, clock, settings).run(cancel.clone());

        let mut received = 0;
        while received < 4 {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received += 1;
        }
        cancel.cancel();
        handle.await.unwrap();
    }
}
