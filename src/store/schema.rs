//! SQLite DDL for the reminder store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation. Timestamps are epoch milliseconds.

use rusqlite::Connection;

/// Complete DDL for the relay database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Concurrent readers alongside the single writer.
PRAGMA journal_mode = WAL;

PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Owned by the account service; read-only to the relay.
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    email      TEXT,
    phone      TEXT,
    push_token TEXT
);

-- Owned by the obligation extractor; read-only to the relay.
CREATE TABLE IF NOT EXISTS obligations (
    id       TEXT PRIMARY KEY,
    user_id  TEXT NOT NULL,
    title    TEXT NOT NULL,
    due_date INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reminders (
    id            TEXT PRIMARY KEY,
    obligation_id TEXT NOT NULL,
    remind_at     INTEGER NOT NULL,
    status        TEXT NOT NULL DEFAULT 'PENDING',
    channel       TEXT NOT NULL DEFAULT 'IN_APP',
    retry_count   INTEGER NOT NULL DEFAULT 0,
    max_retries   INTEGER NOT NULL DEFAULT 3,
    last_error    TEXT,
    locked_at     INTEGER,           -- claim marker, NULL when unclaimed
    created_at    INTEGER NOT NULL
);

-- Drives the claim query: pending, due, oldest first.
CREATE INDEX IF NOT EXISTS idx_reminders_claim ON reminders(status, locked_at, remind_at);

CREATE TABLE IF NOT EXISTS notification_preferences (
    user_id           TEXT PRIMARY KEY,
    channel_priority  TEXT NOT NULL,   -- JSON array of channel names
    email_enabled     INTEGER NOT NULL,
    sms_enabled       INTEGER NOT NULL,
    push_enabled      INTEGER NOT NULL,
    quiet_hours_start TEXT,            -- HH:MM
    quiet_hours_end   TEXT,            -- HH:MM
    utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
    updated_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS notification_logs (
    id                  TEXT PRIMARY KEY,
    reminder_id         TEXT NOT NULL REFERENCES reminders(id),
    channel             TEXT NOT NULL,
    recipient           TEXT NOT NULL,
    status              TEXT NOT NULL,  -- SENT | FAILED
    provider_message_id TEXT,
    error_message       TEXT,
    created_at          INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_reminder ON notification_logs(reminder_id, created_at);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Inserts the current schema version into
/// `schema_meta` if not already present.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = super::types::CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the stored schema version, if any.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value.parse().ok())
        }
        None => Ok(None),
    }
}
