//! Quiet-hours gating and enabled-channel ordering.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use tracing::warn;

use crate::channels::Channel;
use crate::preferences::{NotificationPreference, parse_time_of_day};

/// Channels used when a user has no preferences or none enabled.
pub const FALLBACK_CHANNELS: [Channel; 1] = [Channel::Email];

/// Stateless delivery policy over a [`NotificationPreference`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelPolicyEngine;

impl ChannelPolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// `true` only when a start is set and `start <= now <= end` in the
    /// user's local time, compared at full precision: `23:00:45` is past an
    /// `23:00` end.
    ///
    /// A window that crosses midnight (`22:00`–`02:00`) never matches under
    /// this comparison. That is the current product behavior and is logged
    /// rather than reinterpreted.
    pub fn is_within_quiet_hours(&self, pref: &NotificationPreference, now: DateTime<Utc>) -> bool {
        let Some(start_raw) = pref.quiet_hours_start.as_deref() else {
            return false;
        };
        let Some(start) = parse_time_of_day(start_raw) else {
            warn!(user_id = %pref.user_id, value = start_raw, "unparseable quiet_hours_start");
            return false;
        };
        let Some(end) = pref.quiet_hours_end.as_deref().and_then(parse_time_of_day) else {
            warn!(user_id = %pref.user_id, "quiet_hours_start set without a valid quiet_hours_end");
            return false;
        };
        if start > end {
            warn!(
                user_id = %pref.user_id,
                start = start_raw,
                end = ?pref.quiet_hours_end,
                "quiet-hours window crosses midnight and is never applied"
            );
        }

        let local = local_time(pref, now);
        start <= local && local <= end
    }

    /// `channel_priority` filtered to enabled channels, first occurrence wins.
    pub fn get_enabled_channels(&self, pref: &NotificationPreference) -> Vec<Channel> {
        let mut channels: Vec<Channel> = Vec::with_capacity(pref.channel_priority.len());
        for channel in &pref.channel_priority {
            if pref.is_enabled(*channel) && !channels.contains(channel) {
                channels.push(*channel);
            }
        }
        channels
    }

    /// Channels to attempt, in order, for an optional preference record.
    pub fn resolve_channels(&self, pref: Option<&NotificationPreference>) -> Vec<Channel> {
        let channels = pref
            .map(|p| self.get_enabled_channels(p))
            .unwrap_or_default();
        if channels.is_empty() {
            FALLBACK_CHANNELS.to_vec()
        } else {
            channels
        }
    }
}

/// User-local wall time.
fn local_time(pref: &NotificationPreference, now: DateTime<Utc>) -> NaiveTime {
    (now + Duration::minutes(i64::from(pref.utc_offset_minutes))).time()
}
