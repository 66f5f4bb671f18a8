//! Configuration types for the reminder relay.
//!
//! Every section is `#[serde(default)]`, so a partial TOML file only needs
//! the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channels::Channel;
use crate::preferences::PreferenceDefaults;
use crate::queue::BackoffPolicy;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub preferences: PreferencesConfig,
    pub delivery: DeliveryConfig,
    pub workers: WorkerConfig,
}

/// SQLite reminder store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file path.
    pub db_path: PathBuf,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: 5_000,
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reminder-relay")
        .join("relay.db")
}

/// Periodic claim loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Maximum reminders claimed per batch.
    pub batch_size: usize,
    /// Claims older than this are considered orphaned and released.
    pub lock_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            batch_size: 50,
            lock_timeout_secs: 900,
        }
    }
}

/// What happens to a reminder whose channels all failed but which still has
/// retry budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// Release the claim; the next scheduler sweep picks it up again.
    #[default]
    NextSweep,
    /// Keep the claim and re-enqueue after `immediate_retry_delay_secs`.
    Immediate,
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub retry_mode: RetryMode,
    pub immediate_retry_delay_secs: u64,
    /// Retry budget given to reminders created by this process.
    pub default_max_retries: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_mode: RetryMode::NextSweep,
            immediate_retry_delay_secs: 30,
            default_max_retries: 3,
        }
    }
}

/// Preference defaults and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,
    /// Maximum entries in the in-process cache tier.
    pub cache_capacity: usize,
    /// Primary cache tier. Ignored unless built with the `redis` feature.
    pub redis_url: Option<String>,
    /// Bound on each redis connect or command.
    pub redis_timeout_ms: u64,
    pub default_channel_priority: Vec<Channel>,
    pub default_email_enabled: bool,
    pub default_sms_enabled: bool,
    pub default_push_enabled: bool,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
            redis_url: None,
            redis_timeout_ms: 200,
            default_channel_priority: Channel::ALL.to_vec(),
            default_email_enabled: true,
            default_sms_enabled: false,
            default_push_enabled: true,
        }
    }
}

impl PreferencesConfig {
    /// Record used for users who have never saved preferences.
    pub fn defaults(&self) -> PreferenceDefaults {
        PreferenceDefaults {
            channel_priority: self.default_channel_priority.clone(),
            email_enabled: self.default_email_enabled,
            sms_enabled: self.default_sms_enabled,
            push_enabled: self.default_push_enabled,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms.max(1))
    }
}

/// Email API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailProviderConfig {
    /// Transactional-email endpoint accepting `{from, to, subject, text}`.
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub from: String,
    pub subject: String,
}

impl Default for EmailProviderConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            from: "noreply@localhost".to_owned(),
            subject: "Reminder Notification".to_owned(),
        }
    }
}

/// SMS or push webhook settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookProviderConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

/// Channel provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Upper bound on a single provider call, in seconds.
    pub timeout_secs: u64,
    /// Accept every send without touching the network.
    pub dry_run: bool,
    pub email: EmailProviderConfig,
    pub sms: WebhookProviderConfig,
    pub push: WebhookProviderConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            dry_run: false,
            email: EmailProviderConfig::default(),
            sms: WebhookProviderConfig::default(),
            push: WebhookProviderConfig::default(),
        }
    }
}

/// Dispatch worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_capacity: usize,
    /// Attempts per job for infrastructure failures before abandoning it.
    pub infra_max_attempts: u32,
    pub infra_backoff_initial_ms: u64,
    pub infra_backoff_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 1024,
            infra_max_attempts: 3,
            infra_backoff_initial_ms: 1_000,
            infra_backoff_max_ms: 30_000,
        }
    }
}

impl WorkerConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.infra_backoff_initial_ms),
            max: Duration::from_millis(self.infra_backoff_max_ms),
            multiplier: 2,
        }
    }
}

/// Severity of a configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigIssueSeverity {
    Warning,
    Error,
}

/// Configuration finding surfaced by `check-config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub id: String,
    pub severity: ConfigIssueSeverity,
    pub summary: String,
}

impl RelayConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::RelayError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/reminder-relay/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("reminder-relay")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("reminder-relay")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/reminder-relay/config.toml")
        }
    }

    /// Inspect the configuration for settings that would misbehave at runtime.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.scheduler.batch_size == 0 {
            issues.push(ConfigIssue {
                id: "scheduler-zero-batch".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "scheduler.batch_size must be at least 1.".to_owned(),
            });
        }
        if self.scheduler.tick_interval_secs == 0 {
            issues.push(ConfigIssue {
                id: "scheduler-zero-interval".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "scheduler.tick_interval_secs must be at least 1.".to_owned(),
            });
        }
        if self.workers.concurrency == 0 {
            issues.push(ConfigIssue {
                id: "workers-none".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "workers.concurrency is 0; claimed reminders would never be dispatched."
                    .to_owned(),
            });
        }
        if self.workers.queue_capacity == 0 {
            issues.push(ConfigIssue {
                id: "workers-zero-queue".to_owned(),
                severity: ConfigIssueSeverity::Error,
                summary: "workers.queue_capacity must be at least 1.".to_owned(),
            });
        }

        // A claim must outlive the slowest possible dispatch, or the sweep
        // hands a live job to a second worker.
        let channels = Channel::ALL.len() as u64;
        let worst_dispatch_secs = self.delivery.timeout_secs.saturating_mul(channels);
        if self.scheduler.lock_timeout_secs <= worst_dispatch_secs {
            issues.push(ConfigIssue {
                id: "lock-timeout-too-short".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: format!(
                    "scheduler.lock_timeout_secs ({}) should exceed the worst-case dispatch time ({}s across {} channels).",
                    self.scheduler.lock_timeout_secs, worst_dispatch_secs, channels
                ),
            });
        }
        if self.dispatch.retry_mode == RetryMode::Immediate
            && self.dispatch.immediate_retry_delay_secs >= self.scheduler.lock_timeout_secs
        {
            issues.push(ConfigIssue {
                id: "immediate-retry-outlives-claim".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "dispatch.immediate_retry_delay_secs is not shorter than the lock timeout; held claims will be swept before the retry runs.".to_owned(),
            });
        }

        if self.preferences.default_channel_priority.is_empty() {
            issues.push(ConfigIssue {
                id: "preferences-empty-priority".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "preferences.default_channel_priority is empty; new users fall back to email only.".to_owned(),
            });
        }
        if self.preferences.redis_url.is_some()
            && self.preferences.redis_timeout_ms >= self.delivery.timeout_secs.saturating_mul(1000)
        {
            issues.push(ConfigIssue {
                id: "redis-timeout-long".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "preferences.redis_timeout_ms is not shorter than delivery.timeout_secs; a stalled cache can slow every dispatch.".to_owned(),
            });
        }
        if !cfg!(feature = "redis") && self.preferences.redis_url.is_some() {
            issues.push(ConfigIssue {
                id: "redis-feature-disabled".to_owned(),
                severity: ConfigIssueSeverity::Warning,
                summary: "preferences.redis_url is set but this build lacks the `redis` feature; only the in-process cache is used.".to_owned(),
            });
        }

        if !self.delivery.dry_run {
            let missing = [
                (Channel::Email, self.delivery.email.api_url.is_none()),
                (Channel::Sms, self.delivery.sms.url.is_none()),
                (Channel::Push, self.delivery.push.url.is_none()),
            ];
            for (channel, is_missing) in missing {
                if is_missing {
                    issues.push(ConfigIssue {
                        id: format!("delivery-{channel}-unconfigured"),
                        severity: ConfigIssueSeverity::Warning,
                        summary: format!(
                            "No {channel} endpoint configured; {channel} sends will fail and fall back."
                        ),
                    });
                }
            }
        }

        issues
    }
}
