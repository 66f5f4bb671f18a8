//! Business-level retry budget for reminders.
//!
//! Infrastructure retries (store unreachable and the like) are handled by
//! [`crate::queue::retry_with_backoff`] and never touch these counters.

use crate::store::Reminder;

/// Retry budget decisions over a reminder's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Whether the reminder still has budget left.
    pub fn should_retry(&self, reminder: &Reminder) -> bool {
        reminder.retry_count < reminder.max_retries
    }

    /// Count one failed attempt. Does not decide the next state.
    pub fn increment_retry(&self, reminder: &mut Reminder, error: &str) {
        reminder.retry_count = reminder.retry_count.saturating_add(1);
        reminder.last_error = Some(error.to_owned());
    }
}
