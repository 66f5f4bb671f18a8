//! One dispatch attempt for one claimed reminder.
//!
//! The flow, from a pending reminder:
//!
//! 1. Resolve the user; an unresolvable user is dead-lettered at once.
//! 2. Resolve the channel list from preferences (`["email"]` by default).
//! 3. Inside quiet hours: return without touching the row.
//! 4. Try channels in order; the first success commits `SENT`.
//! 5. All failed: count the attempt and commit `PENDING` or `DEAD_LETTER`.
//!
//! Every path that changes the reminder does so in exactly one commit.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::channels::message::build_reminder_message;
use crate::channels::{Channel, NotificationGateway};
use crate::clock::Clock;
use crate::config::{DispatchConfig, RetryMode};
use crate::error::Result;
use crate::policy::ChannelPolicyEngine;
use crate::preferences::PreferenceResolver;
use crate::retry::RetryPolicy;
use crate::store::{
    ClaimDisposition, LogStatus, NewLogEntry, Reminder, ReminderStatus, ReminderStore,
};

/// Dispatcher knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    pub retry_mode: RetryMode,
    pub immediate_retry_delay: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for DispatchSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            retry_mode: config.retry_mode,
            immediate_retry_delay: Duration::from_secs(config.immediate_retry_delay_secs),
        }
    }
}

/// Why a job was dropped without a dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    NotPending(ReminderStatus),
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered; the reminder is now `SENT`.
    Sent { channel: Channel, message_id: String },
    /// Quiet hours; nothing was written.
    Deferred,
    /// Every channel failed and budget remains. `requeue_after` is set when
    /// the worker should re-enqueue the job itself.
    RetryScheduled {
        retry_count: u32,
        requeue_after: Option<Duration>,
    },
    /// Terminal failure; the reminder is now `DEAD_LETTER`.
    DeadLettered { reason: String },
    Skipped(SkipReason),
}

/// Runs the delivery state machine with injected collaborators.
pub struct DeliveryDispatcher {
    store: Arc<dyn ReminderStore>,
    preferences: Arc<PreferenceResolver>,
    policy: ChannelPolicyEngine,
    retry: RetryPolicy,
    gateway: Arc<dyn NotificationGateway>,
    clock: Arc<dyn Clock>,
    settings: DispatchSettings,
}

impl DeliveryDispatcher {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        preferences: Arc<PreferenceResolver>,
        gateway: Arc<dyn NotificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            preferences,
            policy: ChannelPolicyEngine::new(),
            retry: RetryPolicy::new(),
            gateway,
            clock,
            settings: DispatchSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_policy(mut self, policy: ChannelPolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> DispatchSettings {
        self.settings
    }

    /// Run one dispatch attempt for `reminder_id`.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (store errors) are returned; delivery
    /// failures are folded into the outcome.
    pub async fn dispatch(&self, reminder_id: &str) -> Result<DispatchOutcome> {
        let Some(mut reminder) = self.store.get_reminder(reminder_id)? else {
            warn!(reminder_id, "reminder vanished before dispatch");
            return Ok(DispatchOutcome::Skipped(SkipReason::NotFound));
        };
        if reminder.status != ReminderStatus::Pending {
            debug!(reminder_id, status = reminder.status.as_str(), "reminder already final");
            return Ok(DispatchOutcome::Skipped(SkipReason::NotPending(
                reminder.status,
            )));
        }

        let Some(target) = self.store.resolve_target(&reminder)? else {
            let reason = format!(
                "no user could be resolved for obligation {}; not retrying",
                reminder.obligation_id
            );
            reminder.status = ReminderStatus::DeadLetter;
            reminder.last_error = Some(reason.clone());
            self.store.commit_dispatch(
                &reminder,
                ClaimDisposition::Release,
                None,
                self.clock.now(),
            )?;
            error!(reminder_id, %reason, "reminder dead-lettered");
            return Ok(DispatchOutcome::DeadLettered { reason });
        };

        let preference = match self.preferences.get_preferences(&target.user.id).await {
            Ok(pref) => pref,
            Err(e) => {
                warn!(reminder_id, user_id = %target.user.id, error = %e, "preference lookup failed; using default channel");
                None
            }
        };
        let channels = self.policy.resolve_channels(preference.as_ref());

        if let Some(pref) = &preference
            && self.policy.is_within_quiet_hours(pref, self.clock.now())
        {
            debug!(reminder_id, user_id = %target.user.id, "inside quiet hours; deferring");
            return Ok(DispatchOutcome::Deferred);
        }

        let message = build_reminder_message(&target.obligation);
        let mut last_error = String::new();

        for channel in channels {
            let recipient = target.user.recipient_for(channel);
            let attempt = match recipient {
                Some(recipient) => self
                    .gateway
                    .send(channel, recipient, &message)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err(crate::channels::DeliveryError::MissingRecipient(channel).to_string()),
            };

            match attempt {
                Ok(receipt) => {
                    reminder.status = ReminderStatus::Sent;
                    reminder.channel = channel.label().to_owned();
                    reminder.last_error = None;
                    let log = NewLogEntry {
                        reminder_id: reminder.id.clone(),
                        channel,
                        recipient: recipient.unwrap_or_default().to_owned(),
                        status: LogStatus::Sent,
                        provider_message_id: Some(receipt.message_id.clone()),
                        error_message: None,
                    };
                    self.store.commit_dispatch(
                        &reminder,
                        ClaimDisposition::Release,
                        Some(&log),
                        self.clock.now(),
                    )?;
                    info!(reminder_id, %channel, message_id = %receipt.message_id, "reminder delivered");
                    return Ok(DispatchOutcome::Sent {
                        channel,
                        message_id: receipt.message_id,
                    });
                }
                Err(message) => {
                    warn!(reminder_id, %channel, error = %message, "channel delivery failed");
                    self.store.append_log(
                        &NewLogEntry {
                            reminder_id: reminder.id.clone(),
                            channel,
                            recipient: recipient.unwrap_or_default().to_owned(),
                            status: LogStatus::Failed,
                            provider_message_id: None,
                            error_message: Some(message.clone()),
                        },
                        self.clock.now(),
                    )?;
                    last_error = message;
                }
            }
        }

        self.finish_failed_attempt(reminder, &last_error)
    }

    /// Every channel failed: spend one retry and pick the next state.
    fn finish_failed_attempt(
        &self,
        mut reminder: Reminder,
        last_error: &str,
    ) -> Result<DispatchOutcome> {
        self.retry.increment_retry(&mut reminder, last_error);

        if self.retry.should_retry(&reminder) {
            let (claim, requeue_after) = match self.settings.retry_mode {
                RetryMode::NextSweep => (ClaimDisposition::Release, None),
                RetryMode::Immediate => (
                    ClaimDisposition::Hold,
                    Some(self.settings.immediate_retry_delay),
                ),
            };
            self.store
                .commit_dispatch(&reminder, claim, None, self.clock.now())?;
            info!(
                reminder_id = %reminder.id,
                retry_count = reminder.retry_count,
                max_retries = reminder.max_retries,
                "all channels failed; retry scheduled"
            );
            return Ok(DispatchOutcome::RetryScheduled {
                retry_count: reminder.retry_count,
                requeue_after,
            });
        }

        reminder.status = ReminderStatus::DeadLetter;
        self.store.commit_dispatch(
            &reminder,
            ClaimDisposition::Release,
            None,
            self.clock.now(),
        )?;
        error!(
            reminder_id = %reminder.id,
            retry_count = reminder.retry_count,
            error = last_error,
            "retry budget exhausted; reminder dead-lettered"
        );
        Ok(DispatchOutcome::DeadLettered {
            reason: last_error.to_owned(),
        })
    }
}
