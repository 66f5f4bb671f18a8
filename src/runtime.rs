//! Wires the store, preference cache, gateway, dispatcher, workers, and
//! scheduler into a running relay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channels::{NotificationGateway, ProviderGateway};
use crate::clock::{Clock, SystemClock};
use crate::config::{PreferencesConfig, RelayConfig};
use crate::dispatch::{DeliveryDispatcher, DispatchOutcome, DispatchSettings};
use crate::error::{RelayError, Result};
use crate::preferences::{LocalTtlCache, PreferenceResolver, SharedCache, TieredCache};
use crate::queue::{DispatchEvent, WorkerPool, WorkerSettings, dispatch_with_retry, job_queue};
use crate::scheduler::{Scheduler, SchedulerSettings, TickReport};
use crate::store::SqliteReminderStore;

/// Key namespace for preference entries in a shared cache.
const CACHE_PREFIX: &str = "reminder-relay";

/// Assembled relay components.
pub struct RelayRuntime {
    config: RelayConfig,
    store: Arc<SqliteReminderStore>,
    resolver: Arc<PreferenceResolver>,
    dispatcher: Arc<DeliveryDispatcher>,
    clock: Arc<dyn Clock>,
}

/// Result of [`RelayRuntime::run_once`].
#[derive(Debug, Clone, Default)]
pub struct RunOnceReport {
    pub tick: TickReport,
    pub events: Vec<DispatchEvent>,
}

impl RelayRuntime {
    /// Open the configured database and build the HTTP providers.
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or the HTTP client cannot be
    /// built.
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        let store = Arc::new(SqliteReminderStore::open(
            &config.store.db_path,
            Duration::from_millis(config.store.busy_timeout_ms),
        )?);
        let gateway = ProviderGateway::from_config(&config.delivery)
            .map_err(|e| RelayError::Config(format!("cannot build HTTP client: {e}")))?;
        info!(
            db = %config.store.db_path.display(),
            dry_run = config.delivery.dry_run,
            "relay runtime initialized"
        );
        Ok(Self::with_parts(
            config,
            store,
            Arc::new(gateway),
            Arc::new(SystemClock),
        ))
    }

    /// Assemble from an existing store, gateway, and clock.
    pub fn with_parts(
        config: RelayConfig,
        store: Arc<SqliteReminderStore>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver = Arc::new(PreferenceResolver::new(
            store.clone(),
            build_cache(&config.preferences),
            config.preferences.cache_ttl(),
            config.preferences.defaults(),
            clock.clone(),
        ));
        let dispatcher = Arc::new(
            DeliveryDispatcher::new(store.clone(), resolver.clone(), gateway, clock.clone())
                .with_settings(DispatchSettings::from(&config.dispatch)),
        );
        Self {
            config,
            store,
            resolver,
            dispatcher,
            clock,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SqliteReminderStore> {
        &self.store
    }

    pub fn preferences(&self) -> &Arc<PreferenceResolver> {
        &self.resolver
    }

    pub fn dispatcher(&self) -> &Arc<DeliveryDispatcher> {
        &self.dispatcher
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Start workers and the periodic scheduler.
    pub fn start(&self) -> RelayHandle {
        let cancel = CancellationToken::new();
        let (queue, receiver) = job_queue(self.config.workers.queue_capacity);
        let (events_tx, events) = mpsc::unbounded_channel();

        let workers = WorkerPool::spawn(
            self.dispatcher.clone(),
            receiver,
            queue.clone(),
            WorkerSettings::from(&self.config.workers),
            events_tx,
            cancel.clone(),
        );
        let scheduler = Scheduler::new(
            self.store.clone(),
            queue,
            self.clock.clone(),
            SchedulerSettings::from(&self.config.scheduler),
        )
        .run(cancel.clone());

        RelayHandle {
            events,
            cancel,
            scheduler,
            workers,
        }
    }

    /// Claim one reminder by id and dispatch it the way a worker does,
    /// inside the bounded infrastructure retry.
    ///
    /// An immediate-retry outcome is not requeued here; the claim stays
    /// stamped and the stale-claim sweep hands it back to the scheduler.
    ///
    /// # Errors
    ///
    /// [`RelayError::Claim`] when the reminder is missing, final, or held by
    /// another worker; store failures during the claim.
    pub async fn dispatch_one(&self, reminder_id: &str) -> Result<DispatchEvent> {
        let Some(reminder) = self.store.claim_reminder(reminder_id, self.clock.now())? else {
            return Err(RelayError::Claim(format!(
                "reminder {reminder_id} is missing, no longer pending, or claimed by another worker"
            )));
        };
        info!(reminder_id, remind_at = %reminder.remind_at, "claimed reminder for direct dispatch");

        let settings = WorkerSettings::from(&self.config.workers);
        let event = dispatch_with_retry(&self.dispatcher, reminder_id, &settings).await;
        if let DispatchEvent::Completed {
            outcome:
                DispatchOutcome::RetryScheduled {
                    requeue_after: Some(_),
                    ..
                },
            ..
        } = &event
        {
            info!(reminder_id, "retry left to the next sweep");
        }
        Ok(event)
    }

    /// One scheduler pass, waiting until every claimed job has produced its
    /// event. Immediate-retry requeues still pending when the pass ends are
    /// left to the stale-claim sweep.
    ///
    /// # Errors
    ///
    /// Store failures during the sweep or claim.
    pub async fn run_once(&self) -> Result<RunOnceReport> {
        let cancel = CancellationToken::new();
        let (queue, receiver) = job_queue(self.config.workers.queue_capacity);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let workers = WorkerPool::spawn(
            self.dispatcher.clone(),
            receiver,
            queue.clone(),
            WorkerSettings::from(&self.config.workers),
            events_tx,
            cancel.clone(),
        );
        let scheduler = Scheduler::new(
            self.store.clone(),
            queue,
            self.clock.clone(),
            SchedulerSettings::from(&self.config.scheduler),
        );

        let tick = match scheduler.dispatch_due_reminders().await {
            Ok(tick) => tick,
            Err(e) => {
                cancel.cancel();
                workers.join().await;
                return Err(e);
            }
        };

        let mut outstanding: HashMap<&str, usize> = HashMap::new();
        for id in &tick.reminder_ids {
            *outstanding.entry(id.as_str()).or_default() += 1;
        }
        let mut remaining = tick.reminder_ids.len();
        let mut events = Vec::with_capacity(remaining);
        while remaining > 0 {
            let Some(event) = events_rx.recv().await else {
                warn!(remaining, "workers stopped before every job reported");
                break;
            };
            if let Some(count) = outstanding.get_mut(event.reminder_id())
                && *count > 0
            {
                *count -= 1;
                remaining -= 1;
            }
            events.push(event);
        }

        cancel.cancel();
        workers.join().await;
        Ok(RunOnceReport { tick, events })
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    /// One event per processed job.
    pub events: mpsc::UnboundedReceiver<DispatchEvent>,
    cancel: CancellationToken,
    scheduler: tokio::task::JoinHandle<()>,
    workers: WorkerPool,
}

impl RelayHandle {
    /// Stop ticking, let in-flight jobs finish, and wait for the workers.
    /// Jobs still queued keep their claims until the stale-claim sweep.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.scheduler.await {
            warn!(error = %e, "scheduler task ended abnormally");
        }
        self.workers.join().await;
        info!("relay stopped");
    }
}

/// Local cache, fronted by Redis when configured and compiled in.
pub fn build_cache(config: &PreferencesConfig) -> Arc<dyn SharedCache> {
    let local = LocalTtlCache::new(config.cache_capacity);
    let Some(url) = config.redis_url.as_deref() else {
        return Arc::new(TieredCache::new(None, local));
    };

    #[cfg(feature = "redis")]
    {
        match crate::preferences::RedisCache::new(url, CACHE_PREFIX, config.redis_timeout()) {
            Ok(redis) => {
                info!("preference cache: redis primary with local fallback");
                return Arc::new(
                    TieredCache::new(Some(Arc::new(redis)), local)
                        .with_delete_window(config.cache_ttl()),
                );
            }
            Err(e) => warn!(error = %e, "invalid redis_url; using local cache only"),
        }
    }
    #[cfg(not(feature = "redis"))]
    warn!(
        url,
        prefix = CACHE_PREFIX,
        "redis_url is set but the relay was built without the `redis` feature"
    );

    Arc::new(TieredCache::new(None, local))
}
