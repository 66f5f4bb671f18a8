//! Reminder persistence and the atomic claim primitive.
//!
//! The claim in [`ReminderStore::fetch_batch_for_processing`] is the only
//! cross-worker synchronization point in the relay: a reminder returned by
//! one call is never returned by a concurrent call, here or in another
//! process sharing the database.

pub mod generator;
pub mod schema;
pub mod sqlite;
pub mod types;

use chrono::{DateTime, Utc};

use crate::preferences::NotificationPreference;

pub use sqlite::SqliteReminderStore;
pub use types::{
    ClaimDisposition, DEFAULT_MAX_RETRIES, DispatchTarget, LogStatus, NewLogEntry, NewReminder,
    NotificationLog, Obligation, Reminder, ReminderStatus, User,
};

/// Errors from the reminder store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// The row changed underneath a dispatch (already finalized, or its
    /// retry counter moved past ours).
    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

/// Reminder rows, their claims, and the delivery audit log.
pub trait ReminderStore: Send + Sync {
    /// Atomically claim up to `limit` due, pending, unclaimed reminders,
    /// stamping `locked_at = now`. Contention yields fewer (or zero) rows,
    /// never an error.
    fn fetch_batch_for_processing(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError>;

    /// Clear claims on pending reminders stamped at or before `cutoff`.
    /// Returns how many rows became claimable again.
    fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError>;

    /// Obligation and user behind a reminder, or `None` when either is gone.
    fn resolve_target(&self, reminder: &Reminder) -> Result<Option<DispatchTarget>, StoreError>;

    /// Persist the outcome of one dispatch attempt in a single transaction:
    /// status, channel, retry count, last error, and the claim marker
    /// together, plus `log` when given.
    ///
    /// Fails with [`StoreError::Conflict`] if the row is no longer pending or
    /// `reminder.retry_count` is lower than the stored one.
    fn commit_dispatch(
        &self,
        reminder: &Reminder,
        claim: ClaimDisposition,
        log: Option<&NewLogEntry>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn append_log(
        &self,
        entry: &NewLogEntry,
        now: DateTime<Utc>,
    ) -> Result<NotificationLog, StoreError>;
}

/// Durable home of [`NotificationPreference`] records.
pub trait PreferenceStore: Send + Sync {
    fn load_preferences(&self, user_id: &str)
    -> Result<Option<NotificationPreference>, StoreError>;

    fn save_preferences(&self, preference: &NotificationPreference) -> Result<(), StoreError>;
}
