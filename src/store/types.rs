//! Records owned by the reminder store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channels::Channel;

// ---------------------------------------------------------------------------
// Schema / defaults
// ---------------------------------------------------------------------------

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Retry budget for reminders created without an explicit one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// `reminders.channel` before any successful delivery.
pub const DEFAULT_REMINDER_CHANNEL: &str = "IN_APP";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Reminder lifecycle. `Pending` also covers "awaiting retry"; the other two
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReminderStatus {
    Pending,
    Sent,
    DeadLetter,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "DEAD_LETTER" => Some(Self::DeadLetter),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Outcome of one channel attempt in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Sent,
    Failed,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// What a dispatch commit does with the reminder's claim marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDisposition {
    /// Clear `locked_at`; the row becomes claimable again if still pending.
    Release,
    /// Re-stamp `locked_at` with the commit time; the current worker keeps it.
    Hold,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A scheduled notification for one obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub obligation_id: String,
    pub remind_at: DateTime<Utc>,
    pub status: ReminderStatus,
    /// Label of the channel that last delivered, or `IN_APP` before that.
    pub channel: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    /// Claim marker; set only while a dispatch attempt owns the row.
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for inserting a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReminder {
    pub obligation_id: String,
    pub remind_at: DateTime<Utc>,
    pub max_retries: u32,
}

/// Append-only audit entry for one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub reminder_id: String,
    pub channel: String,
    pub recipient: String,
    pub status: LogStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub reminder_id: String,
    pub channel: Channel,
    pub recipient: String,
    pub status: LogStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
}

/// Notification addresses for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub push_token: Option<String>,
}

impl User {
    /// Address to deliver to on `channel`, if the user has one.
    pub fn recipient_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::Sms => self.phone.as_deref(),
            Channel::Push => self.push_token.as_deref(),
        };
        address.map(str::trim).filter(|a| !a.is_empty())
    }
}

/// A dated obligation that reminders point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub due_date: DateTime<Utc>,
}

/// Everything a dispatch needs to know about who a reminder is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub obligation: Obligation,
    pub user: User,
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
