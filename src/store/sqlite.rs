//! SQLite-backed reminder store.
//!
//! Each `SqliteReminderStore` owns one connection behind a `Mutex`. Several
//! stores (in one process or many) may open the same database file; the
//! claim query is what keeps them from handing out the same reminder twice.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params,
};
use tracing::{debug, warn};

use crate::channels::Channel;
use crate::preferences::NotificationPreference;

use super::schema::{apply_schema, read_schema_version};
use super::types::{
    ClaimDisposition, DispatchTarget, LogStatus, NewLogEntry, NewReminder, NotificationLog,
    Obligation, Reminder, ReminderStatus, User, new_id,
};
use super::{PreferenceStore, ReminderStore, StoreError};

const REMINDER_COLUMNS: &str = "id, obligation_id, remind_at, status, channel, retry_count, \
     max_retries, last_error, locked_at, created_at";

/// Compare-and-set claim: the inner select picks candidates, the outer
/// predicate re-checks `locked_at IS NULL` so a row is stamped at most once.
const CLAIM_SQL: &str = "UPDATE reminders SET locked_at = ?1 \
     WHERE id IN ( \
         SELECT id FROM reminders \
         WHERE status = 'PENDING' AND locked_at IS NULL AND remind_at <= ?1 \
         ORDER BY remind_at, id LIMIT ?2 \
     ) \
     AND status = 'PENDING' AND locked_at IS NULL \
     RETURNING id, obligation_id, remind_at, status, channel, retry_count, \
     max_retries, last_error, locked_at, created_at";

const CLAIM_ONE_SQL: &str = "UPDATE reminders SET locked_at = ?2 \
     WHERE id = ?1 AND status = 'PENDING' AND locked_at IS NULL \
     RETURNING id, obligation_id, remind_at, status, channel, retry_count, \
     max_retries, last_error, locked_at, created_at";

/// Default busy timeout for stores opened without one.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed reminder, log, and preference store.
pub struct SqliteReminderStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteReminderStore {
    /// Open (or create) the database file at `path` and apply the schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database; not shareable across stores.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Insert or replace a user's contact addresses.
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, phone, push_token) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET email = ?2, phone = ?3, push_token = ?4",
            params![user.id, user.email, user.phone, user.push_token],
        )?;
        Ok(())
    }

    pub fn create_obligation(
        &self,
        user_id: &str,
        title: &str,
        due_date: DateTime<Utc>,
    ) -> Result<Obligation, StoreError> {
        let obligation = Obligation {
            id: new_id(),
            user_id: user_id.to_owned(),
            title: title.to_owned(),
            due_date,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO obligations (id, user_id, title, due_date) VALUES (?1, ?2, ?3, ?4)",
            params![
                obligation.id,
                obligation.user_id,
                obligation.title,
                obligation.due_date.timestamp_millis()
            ],
        )?;
        Ok(obligation)
    }

    /// Insert a pending, unclaimed reminder.
    pub fn create_reminder(
        &self,
        new: &NewReminder,
        now: DateTime<Utc>,
    ) -> Result<Reminder, StoreError> {
        let reminder = Reminder {
            id: new_id(),
            obligation_id: new.obligation_id.clone(),
            remind_at: new.remind_at,
            status: ReminderStatus::Pending,
            channel: super::types::DEFAULT_REMINDER_CHANNEL.to_owned(),
            retry_count: 0,
            max_retries: new.max_retries,
            last_error: None,
            locked_at: None,
            created_at: now,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO reminders (id, obligation_id, remind_at, status, channel, retry_count, \
             max_retries, last_error, locked_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, NULL, NULL, ?7)",
            params![
                reminder.id,
                reminder.obligation_id,
                reminder.remind_at.timestamp_millis(),
                reminder.status.as_str(),
                reminder.channel,
                reminder.max_retries,
                reminder.created_at.timestamp_millis()
            ],
        )?;
        Ok(reminder)
    }

    /// Audit trail for one reminder, oldest first.
    pub fn logs_for_reminder(&self, reminder_id: &str) -> Result<Vec<NotificationLog>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, reminder_id, channel, recipient, status, provider_message_id, \
             error_message, created_at FROM notification_logs \
             WHERE reminder_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![reminder_id], row_to_log)?;
        let mut logs = Vec::new();
        for r in rows {
            logs.push(r?);
        }
        Ok(logs)
    }

    /// Claim one reminder by id, whether or not it is due yet.
    ///
    /// `None` when the reminder is missing, no longer pending, or already
    /// claimed by someone else.
    pub fn claim_reminder(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                CLAIM_ONE_SQL,
                params![id, now.timestamp_millis()],
                row_to_reminder,
            )
            .optional()?)
    }

    /// Dead-lettered reminders awaiting operator attention, newest first.
    pub fn list_dead_letters(&self, limit: usize) -> Result<Vec<Reminder>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE status = 'DEAD_LETTER' \
             ORDER BY remind_at DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit_param(limit)], row_to_reminder)?;
        let mut reminders = Vec::new();
        for r in rows {
            reminders.push(r?);
        }
        Ok(reminders)
    }

    /// Reminder counts per status.
    pub fn count_by_status(&self) -> Result<Vec<(ReminderStatus, u64)>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM reminders GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;
        let mut counts = Vec::new();
        for r in rows {
            let (status, count) = r?;
            let status = ReminderStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown reminder status `{status}`")))?;
            counts.push((status, u64::try_from(count).unwrap_or(0)));
        }
        Ok(counts)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

impl ReminderStore for SqliteReminderStore {
    fn fetch_batch_for_processing(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.lock()?;
        match claim_batch(&mut conn, limit, now) {
            Ok(batch) => Ok(batch),
            Err(e) if is_contention(&e) => {
                debug!(error = %e, "claim contended; yielding empty batch");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let released = conn.execute(
            "UPDATE reminders SET locked_at = NULL \
             WHERE status = 'PENDING' AND locked_at IS NOT NULL AND locked_at <= ?1",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(released)
    }

    fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
        Ok(conn
            .query_row(&sql, params![id], row_to_reminder)
            .optional()?)
    }

    fn resolve_target(&self, reminder: &Reminder) -> Result<Option<DispatchTarget>, StoreError> {
        let conn = self.lock()?;
        let target = conn
            .query_row(
                "SELECT o.id, o.user_id, o.title, o.due_date, u.id, u.email, u.phone, u.push_token \
                 FROM obligations o JOIN users u ON u.id = o.user_id WHERE o.id = ?1",
                params![reminder.obligation_id],
                |row| {
                    Ok(DispatchTarget {
                        obligation: Obligation {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            title: row.get(2)?,
                            due_date: millis_at(row, 3)?,
                        },
                        user: User {
                            id: row.get(4)?,
                            email: row.get(5)?,
                            phone: row.get(6)?,
                            push_token: row.get(7)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(target)
    }

    fn commit_dispatch(
        &self,
        reminder: &Reminder,
        claim: ClaimDisposition,
        log: Option<&NewLogEntry>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let locked_at = match claim {
            ClaimDisposition::Release => None,
            ClaimDisposition::Hold => Some(now.timestamp_millis()),
        };
        let changed = tx.execute(
            "UPDATE reminders SET status = ?2, channel = ?3, retry_count = ?4, \
             last_error = ?5, locked_at = ?6 \
             WHERE id = ?1 AND status = 'PENDING' AND retry_count <= ?4",
            params![
                reminder.id,
                reminder.status.as_str(),
                reminder.channel,
                reminder.retry_count,
                reminder.last_error,
                locked_at
            ],
        )?;
        if changed == 0 {
            // Dropping `tx` rolls back.
            return Err(StoreError::Conflict(format!(
                "reminder {} is no longer pending at retry {}",
                reminder.id, reminder.retry_count
            )));
        }
        if let Some(entry) = log {
            insert_log(&tx, entry, now)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn append_log(
        &self,
        entry: &NewLogEntry,
        now: DateTime<Utc>,
    ) -> Result<NotificationLog, StoreError> {
        let conn = self.lock()?;
        Ok(insert_log(&conn, entry, now)?)
    }
}

impl PreferenceStore for SqliteReminderStore {
    fn load_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_id, channel_priority, email_enabled, sms_enabled, push_enabled, \
                 quiet_hours_start, quiet_hours_end, utc_offset_minutes, updated_at \
                 FROM notification_preferences WHERE user_id = ?1",
                params![user_id],
                |row| {
                    let priority: String = row.get(1)?;
                    Ok((
                        priority,
                        NotificationPreference {
                            user_id: row.get(0)?,
                            channel_priority: Vec::new(),
                            email_enabled: row.get(2)?,
                            sms_enabled: row.get(3)?,
                            push_enabled: row.get(4)?,
                            quiet_hours_start: row.get(5)?,
                            quiet_hours_end: row.get(6)?,
                            utc_offset_minutes: row.get(7)?,
                            updated_at: millis_at(row, 8)?,
                        },
                    ))
                },
            )
            .optional()?;

        let Some((priority_json, mut preference)) = row else {
            return Ok(None);
        };
        preference.channel_priority = parse_priority(user_id, &priority_json)?;
        Ok(Some(preference))
    }

    fn save_preferences(&self, preference: &NotificationPreference) -> Result<(), StoreError> {
        let priority = serde_json::to_string(&preference.channel_priority)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO notification_preferences (user_id, channel_priority, email_enabled, \
             sms_enabled, push_enabled, quiet_hours_start, quiet_hours_end, utc_offset_minutes, \
             updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(user_id) DO UPDATE SET channel_priority = ?2, email_enabled = ?3, \
             sms_enabled = ?4, push_enabled = ?5, quiet_hours_start = ?6, quiet_hours_end = ?7, \
             utc_offset_minutes = ?8, updated_at = ?9",
            params![
                preference.user_id,
                priority,
                preference.email_enabled,
                preference.sms_enabled,
                preference.push_enabled,
                preference.quiet_hours_start,
                preference.quiet_hours_end,
                preference.utc_offset_minutes,
                preference.updated_at.timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

fn claim_batch(
    conn: &mut Connection,
    limit: usize,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<Reminder>> {
    // IMMEDIATE takes the write lock up front, so the select and the stamp
    // see the same snapshot.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut claimed = {
        let mut stmt = tx.prepare(CLAIM_SQL)?;
        let rows = stmt.query_map(
            params![now.timestamp_millis(), limit_param(limit)],
            row_to_reminder,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    tx.commit()?;
    // RETURNING order is unspecified.
    claimed.sort_by(|a, b| a.remind_at.cmp(&b.remind_at).then_with(|| a.id.cmp(&b.id)));
    Ok(claimed)
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn insert_log(
    conn: &Connection,
    entry: &NewLogEntry,
    now: DateTime<Utc>,
) -> rusqlite::Result<NotificationLog> {
    let log = NotificationLog {
        id: new_id(),
        reminder_id: entry.reminder_id.clone(),
        channel: entry.channel.as_str().to_owned(),
        recipient: entry.recipient.clone(),
        status: entry.status,
        provider_message_id: entry.provider_message_id.clone(),
        error_message: entry.error_message.clone(),
        created_at: now,
    };
    conn.execute(
        "INSERT INTO notification_logs (id, reminder_id, channel, recipient, status, \
         provider_message_id, error_message, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            log.id,
            log.reminder_id,
            log.channel,
            log.recipient,
            log.status.as_str(),
            log.provider_message_id,
            log.error_message,
            log.created_at.timestamp_millis()
        ],
    )?;
    Ok(log)
}

/// Drop channel names this build does not know instead of failing the
/// whole record.
fn parse_priority(user_id: &str, json: &str) -> Result<Vec<Channel>, StoreError> {
    let names: Vec<String> = serde_json::from_str(json)
        .map_err(|e| StoreError::Corrupt(format!("channel_priority for {user_id}: {e}")))?;
    Ok(names
        .iter()
        .filter_map(|name| match name.parse::<Channel>() {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!(user_id, error = %e, "ignoring stored channel");
                None
            }
        })
        .collect())
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn millis_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("timestamp {ms} out of range")))
}

fn optional_millis_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    match ms {
        Some(_) => millis_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn row_to_reminder(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    let status: String = row.get(3)?;
    let status = ReminderStatus::parse(&status).ok_or_else(|| {
        conversion_error(3, Type::Text, format!("unknown reminder status `{status}`"))
    })?;
    Ok(Reminder {
        id: row.get(0)?,
        obligation_id: row.get(1)?,
        remind_at: millis_at(row, 2)?,
        status,
        channel: row.get(4)?,
        retry_count: row.get(5)?,
        max_retries: row.get(6)?,
        last_error: row.get(7)?,
        locked_at: optional_millis_at(row, 8)?,
        created_at: millis_at(row, 9)?,
    })
}

fn row_to_log(row: &Row<'_>) -> rusqlite::Result<NotificationLog> {
    let status: String = row.get(4)?;
    let status = LogStatus::parse(&status)
        .ok_or_else(|| conversion_error(4, Type::Text, format!("unknown log status `{status}`")))?;
    Ok(NotificationLog {
        id: row.get(0)?,
        reminder_id: row.get(1)?,
        channel: row.get(2)?,
        recipient: row.get(3)?,
        status,
        provider_message_id: row.get(5)?,
        error_message: row.get(6)?,
        created_at: millis_at(row, 7)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
