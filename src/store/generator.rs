//! Reminder schedule for a dated obligation.

use chrono::{DateTime, Duration, Utc};

use super::types::NewReminder;

/// Days before the due date at which reminders fire.
pub const DEFAULT_OFFSET_DAYS: [i64; 3] = [30, 7, 1];

/// Reminders for `obligation_id` at each offset before `due`, earliest first.
///
/// Offsets that already lie in the past relative to `now` are skipped, so an
/// obligation discovered six days out only gets the one-day reminder.
pub fn reminders_for_due_date(
    obligation_id: &str,
    due: DateTime<Utc>,
    now: DateTime<Utc>,
    offset_days: &[i64],
    max_retries: u32,
) -> Vec<NewReminder> {
    let mut reminders: Vec<NewReminder> = offset_days
        .iter()
        .filter_map(|days| due.checked_sub_signed(Duration::days(*days)))
        .filter(|remind_at| *remind_at >= now)
        .map(|remind_at| NewReminder {
            obligation_id: obligation_id.to_owned(),
            remind_at,
            max_retries,
        })
        .collect();
    reminders.sort_by_key(|r| r.remind_at);
    reminders.dedup_by_key(|r| r.remind_at);
    reminders
}
