//! Per-user notification settings and partial updates.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::channels::Channel;

use super::PreferenceError;

/// Quiet-hours strings are 24-hour local time, e.g. `21:30`.
pub const QUIET_HOURS_FORMAT: &str = "%H:%M";

/// Stored delivery settings for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: String,
    /// Channels in the order they should be tried.
    pub channel_priority: Vec<Channel>,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    /// Offset of the user's local time from UTC; quiet hours are compared in
    /// local time.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// Fresh record for a user who has never saved preferences.
    pub fn with_defaults(
        user_id: &str,
        defaults: &PreferenceDefaults,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.to_owned(),
            channel_priority: defaults.channel_priority.clone(),
            email_enabled: defaults.email_enabled,
            sms_enabled: defaults.sms_enabled,
            push_enabled: defaults.push_enabled,
            quiet_hours_start: None,
            quiet_hours_end: None,
            utc_offset_minutes: 0,
            updated_at: now,
        }
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::Push => self.push_enabled,
        }
    }

    /// Merge the supplied fields; anything absent from `update` is kept.
    pub fn apply(&mut self, update: &PreferenceUpdate) {
        if let Some(priority) = &update.channel_priority {
            self.channel_priority = priority.clone();
        }
        if let Some(v) = update.email_enabled {
            self.email_enabled = v;
        }
        if let Some(v) = update.sms_enabled {
            self.sms_enabled = v;
        }
        if let Some(v) = update.push_enabled {
            self.push_enabled = v;
        }
        if let Some(start) = &update.quiet_hours_start {
            self.quiet_hours_start = start.clone();
        }
        if let Some(end) = &update.quiet_hours_end {
            self.quiet_hours_end = end.clone();
        }
        if let Some(offset) = update.utc_offset_minutes {
            self.utc_offset_minutes = offset;
        }
    }
}

/// Values given to users without a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferenceDefaults {
    pub channel_priority: Vec<Channel>,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub push_enabled: bool,
}

impl Default for PreferenceDefaults {
    fn default() -> Self {
        Self {
            channel_priority: Channel::ALL.to_vec(),
            email_enabled: true,
            sms_enabled: false,
            push_enabled: true,
        }
    }
}

/// Partial preference payload.
///
/// Every field is optional. For the quiet-hours fields an explicit JSON
/// `null` (`Some(None)`) clears the stored value, while a missing key
/// (`None`) keeps it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_priority: Option<Vec<Channel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_enabled: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub quiet_hours_start: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub quiet_hours_end: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_offset_minutes: Option<i32>,
}

impl PreferenceUpdate {
    /// Reject malformed quiet-hours strings and out-of-range offsets.
    pub fn validate(&self) -> Result<(), PreferenceError> {
        for value in [&self.quiet_hours_start, &self.quiet_hours_end]
            .into_iter()
            .flatten()
            .flatten()
        {
            if parse_time_of_day(value).is_none() {
                return Err(PreferenceError::Invalid(format!(
                    "quiet hours must be HH:MM (24-hour), got `{value}`"
                )));
            }
        }
        if let Some(offset) = self.utc_offset_minutes
            && !(-14 * 60..=14 * 60).contains(&offset)
        {
            return Err(PreferenceError::Invalid(format!(
                "utc_offset_minutes {offset} is outside ±14h"
            )));
        }
        Ok(())
    }
}

/// Distinguishes an explicit `null` from a missing key.
fn deserialize_present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Parse a 24-hour `HH:MM` string.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), QUIET_HOURS_FORMAT).ok()
}
